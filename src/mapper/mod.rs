//! Mapping engine: FSM + regex fallback + optional cache, resolving `(name, type)` to a
//! [`MappingRule`] and its captured labels.

pub mod cache;
pub mod config;
pub mod fsm;
pub mod regex_fallback;
pub mod rule;
pub mod template;

use crate::event::{Labels, MetricType};
use cache::{CachePolicy, CachedResolution, ResolutionCache};
use config::{Action, MapperConfig, MatchType};
use fsm::Fsm;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use regex_fallback::RegexFallback;
use rule::MappingRule;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use template::TemplateFormatter;
use thiserror::Error;

/// Why an entire config reload was rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("rule {0}: glob pattern {1:?} does not match `(*.|id.)+(*|id)`")]
    InvalidGlobPattern(usize, String),
    #[error("rule {0}: invalid regex {1:?}: {2}")]
    InvalidRegex(usize, String, regex::Error),
    #[error("rule {0}: unknown match_metric_type {1:?}")]
    InvalidMetricType(usize, String),
    #[error("rule {0}: duplicate quantile {1}")]
    DuplicateQuantile(usize, f64),
    #[error("rule {0}: empty name template")]
    EmptyName(usize),
}

fn parse_metric_type(raw: &str) -> Result<Option<MetricType>, ()> {
    match raw {
        "" => Ok(None),
        "counter" => Ok(Some(MetricType::Counter)),
        "gauge" => Ok(Some(MetricType::Gauge)),
        "observer" | "timer" => Ok(Some(MetricType::Observer)),
        _ => Err(()),
    }
}

fn is_valid_glob(pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('.').collect();
    if segments.is_empty() {
        return false;
    }

    segments.iter().all(|seg| {
        *seg == "*"
            || (!seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
    })
}

/// The immutable, fully-compiled result of one successful config load.
pub struct CompiledMapper {
    pub rules: Vec<MappingRule>,
    pub fsm: Fsm,
    pub regex_fallback: RegexFallback,
    pub global_labels: Labels,
    cache: Mutex<ResolutionCache>,
}

impl CompiledMapper {
    pub fn compile(
        config: &MapperConfig,
        cache_policy: CachePolicy,
        cache_size: usize,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.mappings.len());
        let mut fsm = Fsm::new(config.glob_disable_ordering);
        let mut regex_fallback = RegexFallback::new();

        for (idx, entry) in config.mappings.iter().enumerate() {
            let match_type = entry.match_type.unwrap_or(
                config
                    .defaults
                    .match_type
                    .unwrap_or(MatchType::Glob),
            );

            let match_metric_type_raw = entry.match_metric_type.as_deref().unwrap_or("");
            let match_metric_type = parse_metric_type(match_metric_type_raw)
                .map_err(|_| ConfigError::InvalidMetricType(idx, match_metric_type_raw.to_owned()))?;

            if entry.name.is_empty() {
                return Err(ConfigError::EmptyName(idx));
            }

            match match_type {
                MatchType::Glob => {
                    if !is_valid_glob(&entry.match_) {
                        return Err(ConfigError::InvalidGlobPattern(idx, entry.match_.clone()));
                    }
                    fsm.insert(&entry.match_, match_metric_type, idx);
                }
                MatchType::Regex => {
                    let anchored = if entry.match_.starts_with('^') {
                        entry.match_.clone()
                    } else {
                        format!("^{}$", entry.match_)
                    };
                    let regex = Regex::new(&anchored)
                        .map_err(|e| ConfigError::InvalidRegex(idx, entry.match_.clone(), e))?;
                    regex_fallback.push(regex, idx);
                }
            }

            // Terminal default is `summary`: an explicit `default` (or nothing set at all, on
            // the rule or on `defaults`) resolves here, once, so dispatch never has to ask.
            let observer_type = match entry.observer_type.or(config.defaults.observer_type) {
                Some(config::ObserverType::Default) | None => config::ObserverType::Summary,
                Some(other) => other,
            };

            let histogram_buckets = entry
                .histogram_options
                .as_ref()
                .and_then(|h| h.buckets.clone())
                .or_else(|| {
                    config
                        .defaults
                        .histogram_options
                        .as_ref()
                        .and_then(|h| h.buckets.clone())
                })
                .unwrap_or_else(rule::default_histogram_buckets);

            let summary_opts = entry
                .summary_options
                .clone()
                .or_else(|| config.defaults.summary_options.clone())
                .unwrap_or_default();

            let summary_quantiles = summary_opts
                .quantiles
                .unwrap_or_else(rule::default_summary_quantiles);

            {
                let mut seen = Vec::new();
                for q in &summary_quantiles {
                    if seen.contains(&q.quantile) {
                        return Err(ConfigError::DuplicateQuantile(idx, q.quantile));
                    }
                    seen.push(q.quantile);
                }
            }

            let summary_max_age =
                Duration::from_secs(summary_opts.max_age.unwrap_or(10 * 60));
            let summary_age_buckets = summary_opts.age_buckets.unwrap_or(5);

            let ttl = Duration::from_secs(
                entry.ttl.or(config.defaults.ttl).unwrap_or(0),
            );

            let action = entry
                .action
                .unwrap_or(config.defaults.action.unwrap_or(Action::Map));

            let help_text = entry
                .help_text
                .clone()
                .or_else(|| config.defaults.help_text.clone())
                .unwrap_or_else(|| format!("Metric autogenerated by mapping rule {idx}"));

            let name_template = TemplateFormatter::compile(&entry.name);
            let label_templates: BTreeMap<String, TemplateFormatter> = entry
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), TemplateFormatter::compile(v)))
                .collect();

            rules.push(MappingRule {
                priority: idx,
                match_type,
                match_metric_type,
                raw_pattern: entry.match_.clone(),
                name_template,
                label_templates,
                observer_type,
                histogram_buckets,
                summary_quantiles,
                summary_max_age,
                summary_age_buckets,
                ttl,
                action,
                help_text,
            });
        }

        let global_labels: Labels = config
            .global_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            rules,
            fsm,
            regex_fallback,
            global_labels,
            cache: Mutex::new(ResolutionCache::new(cache_policy, cache_size)),
        })
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

/// One resolved `(name, type)` lookup: the winning rule plus its captures.
pub struct Resolution {
    compiled: Arc<CompiledMapper>,
    rule_idx: usize,
    captures: Vec<String>,
}

impl Resolution {
    pub fn rule(&self) -> &MappingRule {
        &self.compiled.rules[self.rule_idx]
    }

    pub fn target_name(&self) -> String {
        self.rule().name_template.apply(&self.captures)
    }

    pub fn labels(&self) -> Labels {
        self.rule()
            .label_templates
            .iter()
            .map(|(k, tmpl)| (k.clone(), tmpl.apply(&self.captures)))
            .collect()
    }
}

/// The live, reloadable mapping engine. Guarded by a `parking_lot::RwLock` so a reload (write)
/// and concurrent lookups (read) never race.
pub struct Mapper {
    compiled: RwLock<Arc<CompiledMapper>>,
    cache_policy: CachePolicy,
    cache_size: usize,
}

impl Mapper {
    pub fn new(
        config: &MapperConfig,
        cache_policy: CachePolicy,
        cache_size: usize,
    ) -> Result<Self, ConfigError> {
        let compiled = CompiledMapper::compile(config, cache_policy, cache_size)?;

        Ok(Self {
            compiled: RwLock::new(Arc::new(compiled)),
            cache_policy,
            cache_size,
        })
    }

    /// Atomically swaps in a newly-compiled config, or leaves the current one in place if
    /// compilation fails.
    pub fn reload(&self, config: &MapperConfig) -> Result<(), ConfigError> {
        let compiled = CompiledMapper::compile(config, self.cache_policy, self.cache_size)?;
        *self.compiled.write() = Arc::new(compiled);
        Ok(())
    }

    pub fn loaded_mappings(&self) -> usize {
        self.compiled.read().rules.len()
    }

    pub fn global_labels(&self) -> Labels {
        self.compiled.read().global_labels.clone()
    }

    pub fn cache_len(&self) -> usize {
        self.compiled.read().cache_len()
    }

    /// Renders the live FSM as Graphviz DOT, for `--debug.dump-fsm`.
    pub fn dump_fsm_dot(&self) -> String {
        self.compiled.read().fsm.dump_dot()
    }

    /// Resolves `name`/`metric_type` against the live mapper: cache, then FSM, then regex
    /// fallback, writing the result back into the cache either way.
    pub fn get_mapping(&self, name: &str, metric_type: MetricType) -> Option<Resolution> {
        let compiled = Arc::clone(&self.compiled.read());

        if let Some(cached) = compiled.cache.lock().get(name, metric_type) {
            return match cached {
                CachedResolution::Hit { rule_idx, labels } => Some(Resolution {
                    compiled,
                    rule_idx,
                    captures: labels,
                }),
                CachedResolution::Miss => None,
            };
        }

        let resolved = compiled
            .fsm
            .resolve(name, metric_type)
            .or_else(|| compiled.regex_fallback.resolve(name));

        match resolved {
            Some((rule_idx, captures)) => {
                compiled.cache.lock().put(
                    name,
                    metric_type,
                    CachedResolution::Hit {
                        rule_idx,
                        labels: captures.clone(),
                    },
                );

                Some(Resolution {
                    compiled,
                    rule_idx,
                    captures,
                })
            }
            None => {
                compiled
                    .cache
                    .lock()
                    .put(name, metric_type, CachedResolution::Miss);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> MapperConfig {
        MapperConfig::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn s1_dispatcher_rule() {
        let yaml = r#"
mappings:
  - match: "test.dispatcher.*.*.*"
    match_metric_type: counter
    name: "dispatcher_events"
    labels:
      processor: "$1"
      action: "$2"
      outcome: "$3"
      job: "test_dispatcher"
"#;
        let mapper = Mapper::new(&parse(yaml), CachePolicy::Lru, 0).unwrap();
        let res = mapper
            .get_mapping("test.dispatcher.FooProcessor.send.success", MetricType::Counter)
            .unwrap();

        assert_eq!(res.target_name(), "dispatcher_events");
        let labels = res.labels();
        assert_eq!(labels.get("processor").map(String::as_str), Some("FooProcessor"));
        assert_eq!(labels.get("action").map(String::as_str), Some("send"));
        assert_eq!(labels.get("outcome").map(String::as_str), Some("success"));
        assert_eq!(labels.get("job").map(String::as_str), Some("test_dispatcher"));
    }

    #[test]
    fn p8_ordered_priority() {
        let yaml = r#"
mappings:
  - match: "a.*"
    name: "wildcard_rule"
  - match: "a.b"
    name: "specific_rule"
"#;
        let mapper = Mapper::new(&parse(yaml), CachePolicy::Lru, 0).unwrap();
        let res = mapper.get_mapping("a.b", MetricType::Counter).unwrap();
        assert_eq!(res.target_name(), "wildcard_rule");
    }

    #[test]
    fn invalid_glob_rejects_whole_config() {
        let yaml = r#"
mappings:
  - match: "a.**.c"
    name: "x"
"#;
        assert!(Mapper::new(&parse(yaml), CachePolicy::Lru, 0).is_err());
    }

    #[test]
    fn p9_reload_keeps_previous_mapper_on_failure() {
        let good = r#"
mappings:
  - match: "a.*"
    name: "good"
"#;
        let bad = r#"
mappings:
  - match: "a.**"
    name: "bad"
"#;
        let mapper = Mapper::new(&parse(good), CachePolicy::Lru, 0).unwrap();
        assert!(mapper.reload(&parse(bad)).is_err());

        let res = mapper.get_mapping("a.b", MetricType::Counter).unwrap();
        assert_eq!(res.target_name(), "good");
    }

    #[test]
    fn regex_fallback_used_when_fsm_misses() {
        let yaml = r#"
mappings:
  - match: "^custom_(.*)_total$"
    match_type: regex
    name: "custom_$1"
"#;
        let mapper = Mapper::new(&parse(yaml), CachePolicy::Lru, 0).unwrap();
        let res = mapper.get_mapping("custom_foo_total", MetricType::Counter).unwrap();
        assert_eq!(res.target_name(), "custom_foo");
    }
}
