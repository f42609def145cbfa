//! Regex fallback matching, tried in config order when the FSM finds no match.

use regex::Regex;

/// A single compiled regex rule: its anchored pattern plus the global rule index (== priority)
/// it resolves to.
pub struct RegexRule {
    pub regex: Regex,
    pub rule_idx: usize,
}

/// The ordered list of regex rules tried after the FSM misses.
#[derive(Default)]
pub struct RegexFallback {
    rules: Vec<RegexRule>,
}

impl RegexFallback {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn push(&mut self, regex: Regex, rule_idx: usize) {
        self.rules.push(RegexRule { regex, rule_idx });
    }

    /// Returns the first regex (in config order) that matches `name`, plus its captures
    /// (1-based group index 1 lives at `captures[0]`).
    pub fn resolve(&self, name: &str) -> Option<(usize, Vec<String>)> {
        for rule in &self.rules {
            if let Some(caps) = rule.regex.captures(name) {
                let captures: Vec<String> = caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_owned()).unwrap_or_default())
                    .collect();

                return Some((rule.rule_idx, captures));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_in_order_wins() {
        let mut fb = RegexFallback::new();
        fb.push(Regex::new("^foo_(.*)$").unwrap(), 0);
        fb.push(Regex::new("^foo_bar$").unwrap(), 1);

        let (idx, caps) = fb.resolve("foo_bar").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(caps, vec!["bar"]);
    }
}
