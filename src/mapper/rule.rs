//! The compiled, resolved shape of a mapping rule.

use super::config::{Action, MatchType, ObserverType, QuantileSpec};
use super::template::TemplateFormatter;
use crate::event::MetricType;
use std::collections::BTreeMap;
use std::time::Duration;

/// A fully-resolved mapping rule: defaults already folded in, templates already compiled.
pub struct MappingRule {
    /// 0-based position in the config file's `mappings` list; doubles as FSM/regex tie-break
    /// priority (smaller wins).
    pub priority: usize,
    pub match_type: MatchType,
    pub match_metric_type: Option<MetricType>,
    pub raw_pattern: String,
    pub name_template: TemplateFormatter,
    pub label_templates: BTreeMap<String, TemplateFormatter>,
    pub observer_type: ObserverType,
    pub histogram_buckets: Vec<f64>,
    pub summary_quantiles: Vec<QuantileSpec>,
    pub summary_max_age: Duration,
    pub summary_age_buckets: u32,
    pub ttl: Duration,
    pub action: Action,
    pub help_text: String,
}

/// Builtin histogram buckets, matching the Prometheus client library default set.
pub fn default_histogram_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

/// Builtin summary quantiles.
pub fn default_summary_quantiles() -> Vec<QuantileSpec> {
    vec![
        QuantileSpec {
            quantile: 0.5,
            error: 0.05,
        },
        QuantileSpec {
            quantile: 0.9,
            error: 0.01,
        },
        QuantileSpec {
            quantile: 0.99,
            error: 0.001,
        },
    ]
}

impl MappingRule {
    /// The implicit rule applied to an event that matched no configured mapping: registered
    /// under its escaped name with no TTL and the builtin observer defaults.
    pub fn unmapped() -> Self {
        Self {
            priority: usize::MAX,
            match_type: MatchType::Glob,
            match_metric_type: None,
            raw_pattern: String::new(),
            name_template: TemplateFormatter::compile(""),
            label_templates: BTreeMap::new(),
            observer_type: ObserverType::Summary,
            histogram_buckets: default_histogram_buckets(),
            summary_quantiles: default_summary_quantiles(),
            summary_max_age: Duration::from_secs(10 * 60),
            summary_age_buckets: 5,
            ttl: Duration::ZERO,
            action: Action::Map,
            help_text: "Unmapped metric, exported under its escaped original name".to_owned(),
        }
    }
}
