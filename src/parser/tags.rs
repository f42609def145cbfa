//! Dialect-specific tag extraction: name-embedded tags (SignalFX/Librato/InfluxDB) and
//! DogStatsD's `|#...` sample-trailing tags.

use crate::event::Labels;

/// Which name-embedded / sample-trailing tag dialects are recognised.
///
/// Each toggle matches a `--statsd.parse-*-tags` CLI flag, all defaulting to
/// `true`.
#[derive(Clone, Copy, Debug)]
pub struct DialectOptions {
    pub dogstatsd: bool,
    pub influxdb: bool,
    pub librato: bool,
    pub signalfx: bool,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            dogstatsd: true,
            influxdb: true,
            librato: true,
            signalfx: true,
        }
    }
}

/// Outcome of stripping name-embedded tags from a metric name.
pub struct NameTags {
    pub name: String,
    pub tags: Labels,
    /// `true` if any name-embedded tag syntax was recognised and applied.
    pub had_tags: bool,
    pub tag_errors: u64,
}

/// Strips SignalFX `[k=v,...]`, Librato `#k=v,...` or InfluxDB `,k=v,...` tags from `name`,
/// per the toggles in `opts`. SignalFX is checked first; Librato/InfluxDB share a single
/// left-to-right scan for whichever separator (`#` or `,`) appears first.
pub fn extract_name_tags(name: &str, opts: DialectOptions) -> NameTags {
    let mut tag_errors = 0u64;

    if opts.signalfx {
        if let Some(open) = name.find('[') {
            match name[open..].find(']') {
                Some(rel_close) => {
                    let close = open + rel_close;
                    let bracketed = &name[open + 1..close];
                    let mut tags = Labels::new();
                    for kv in bracketed.split(',') {
                        if kv.is_empty() {
                            continue;
                        }
                        match kv.split_once('=') {
                            Some((k, v)) => insert_sanitised(&mut tags, k, v, &mut tag_errors),
                            None => tag_errors += 1,
                        }
                    }
                    let mut new_name = String::with_capacity(name.len());
                    new_name.push_str(&name[..open]);
                    new_name.push_str(&name[close + 1..]);
                    return NameTags {
                        name: new_name,
                        tags,
                        had_tags: true,
                        tag_errors,
                    };
                }
                None => {
                    // Unbalanced brackets: leave name untouched, count a tag error.
                    tag_errors += 1;
                    return NameTags {
                        name: name.to_owned(),
                        tags: Labels::new(),
                        had_tags: false,
                        tag_errors,
                    };
                }
            }
        }
    }

    if opts.librato || opts.influxdb {
        let hash_idx = if opts.librato { name.find('#') } else { None };
        let comma_idx = if opts.influxdb { name.find(',') } else { None };

        let chosen = match (hash_idx, comma_idx) {
            (Some(h), Some(c)) => Some(h.min(c)),
            (Some(h), None) => Some(h),
            (None, Some(c)) => Some(c),
            (None, None) => None,
        };

        if let Some(idx) = chosen {
            let tag_str = &name[idx + 1..];
            let mut tags = Labels::new();
            for kv in tag_str.split(',') {
                if kv.is_empty() {
                    continue;
                }
                match kv.split_once('=') {
                    Some((k, v)) => insert_sanitised(&mut tags, k, v, &mut tag_errors),
                    None => tag_errors += 1,
                }
            }

            return NameTags {
                name: name[..idx].to_owned(),
                tags,
                had_tags: true,
                tag_errors,
            };
        }
    }

    NameTags {
        name: name.to_owned(),
        tags: Labels::new(),
        had_tags: false,
        tag_errors,
    }
}

/// Parses DogStatsD trailing tags, e.g. `#tag1:bar,tag2:baz` (leading `#` optional per-tag).
pub fn parse_dogstatsd_tags(raw: &str) -> (Labels, u64) {
    let mut tags = Labels::new();
    let mut errors = 0u64;

    for mut tag in raw.split(',') {
        tag = tag.trim_start_matches('#');
        if tag.is_empty() {
            continue;
        }
        match tag.split_once(':') {
            Some((k, v)) => insert_sanitised(&mut tags, k, v, &mut errors),
            None => errors += 1,
        }
    }

    (tags, errors)
}

/// Sanitises a tag key to `[a-zA-Z_][a-zA-Z0-9_]*` and inserts `key=value`, unless either is
/// empty (counted as a tag error and dropped).
fn insert_sanitised(tags: &mut Labels, key: &str, value: &str, errors: &mut u64) {
    if key.is_empty() || value.is_empty() {
        *errors += 1;
        return;
    }

    tags.insert(sanitise_label_name(key), value.to_owned());
}

/// Normalises a label name to match `[a-zA-Z_][a-zA-Z0-9_]*`: prefixes `_` if it starts with a
/// digit, replaces any other illegal byte with `_`.
pub fn sanitise_label_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);

    let mut chars = raw.chars();
    if let Some(first) = chars.clone().next() {
        if first.is_ascii_digit() {
            out.push('_');
        }
    }

    for c in chars.by_ref() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signalfx_brackets_stripped() {
        let r = extract_name_tags("prefix[k1=v1,k2=v2]suffix", DialectOptions::default());
        assert_eq!(r.name, "prefixsuffix");
        assert_eq!(r.tags.get("k1").map(String::as_str), Some("v1"));
        assert_eq!(r.tags.get("k2").map(String::as_str), Some("v2"));
    }

    #[test]
    fn signalfx_unbalanced_keeps_name() {
        let r = extract_name_tags("prefix[k1=v1", DialectOptions::default());
        assert_eq!(r.name, "prefix[k1=v1");
        assert!(!r.had_tags);
        assert_eq!(r.tag_errors, 1);
    }

    #[test]
    fn librato_hash_tags() {
        let r = extract_name_tags("metric#k=v,j=w", DialectOptions::default());
        assert_eq!(r.name, "metric");
        assert_eq!(r.tags.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn influxdb_comma_tags() {
        let r = extract_name_tags("metric,k=v,j=w", DialectOptions::default());
        assert_eq!(r.name, "metric");
        assert_eq!(r.tags.get("j").map(String::as_str), Some("w"));
    }

    #[test]
    fn label_sanitisation() {
        assert_eq!(sanitise_label_name("1abc"), "_1abc");
        assert_eq!(sanitise_label_name("a-b.c"), "a_b_c");
    }
}
