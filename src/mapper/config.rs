//! Wire format (YAML, via `serde`/`serde_yaml`) for the mapping configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Glob,
    Regex,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ObserverType {
    #[default]
    Default,
    Histogram,
    Summary,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Map,
    Drop,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct QuantileSpec {
    pub quantile: f64,
    #[serde(default = "default_quantile_error")]
    pub error: f64,
}

fn default_quantile_error() -> f64 {
    0.01
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct HistogramOptions {
    pub buckets: Option<Vec<f64>>,
    pub native_histogram_bucket_factor: Option<f64>,
    pub native_histogram_max_buckets: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SummaryOptions {
    pub quantiles: Option<Vec<QuantileSpec>>,
    pub max_age: Option<u64>,
    pub age_buckets: Option<u32>,
    pub buf_cap: Option<u32>,
}

/// A single `mappings[]` entry, exactly as written in the YAML file. Any field left unset
/// falls back to `MapperConfig::defaults`, then to a builtin default.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct MappingConfigEntry {
    #[serde(rename = "match")]
    pub match_: String,
    pub match_type: Option<MatchType>,
    pub match_metric_type: Option<String>,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub observer_type: Option<ObserverType>,
    pub histogram_options: Option<HistogramOptions>,
    pub summary_options: Option<SummaryOptions>,
    pub ttl: Option<u64>,
    pub action: Option<Action>,
    pub help_text: Option<String>,
}

/// `defaults`: the same shape as a mapping entry, minus `match`/`name`, used purely to seed
/// fallback values.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct MappingDefaults {
    pub match_type: Option<MatchType>,
    pub observer_type: Option<ObserverType>,
    pub histogram_options: Option<HistogramOptions>,
    pub summary_options: Option<SummaryOptions>,
    pub ttl: Option<u64>,
    pub action: Option<Action>,
    pub help_text: Option<String>,
}

/// The root of the mapping config YAML file.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct MapperConfig {
    #[serde(default)]
    pub defaults: MappingDefaults,
    #[serde(default)]
    pub mappings: Vec<MappingConfigEntry>,
    #[serde(default)]
    pub global_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub glob_disable_ordering: bool,
}

impl MapperConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }
}
