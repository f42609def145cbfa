//! A hand-rolled summary metric vector.
//!
//! The `prometheus` crate has no built-in summary type, so this mirrors the shape of one of its
//! `*Vec` types (`with_label_values`/`remove_label_values`, one child per label-value
//! combination) but renders its own Prometheus text exposition lines directly rather than going
//! through `prometheus::Registry`. See DESIGN.md.

use crate::clock::Clock;
use crate::mapper::config::QuantileSpec;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Child {
    label_values: Vec<String>,
    samples: Vec<(Instant, f64)>,
}

/// A named, labelled summary metric with sliding-window quantile estimation.
///
/// Approximates a streaming quantile sketch with a single `max_age`-wide retention window over
/// raw samples, sorted on collection, rather than a rotating set of `age_buckets` sub-windows
/// merged through a CKMS sketch. `age_buckets` stays in the config surface for compatibility.
/// See DESIGN.md "Open Question: summary quantile algorithm".
pub struct SummaryVec {
    name: String,
    help: String,
    label_names: Vec<String>,
    quantiles: Vec<QuantileSpec>,
    max_age: Duration,
    children: Mutex<HashMap<u64, Child>>,
    clock: Arc<dyn Clock>,
}

impl SummaryVec {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: Vec<String>,
        quantiles: Vec<QuantileSpec>,
        max_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_names,
            quantiles,
            max_age,
            children: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn key(values: &[String]) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        values.hash(&mut h);
        h.finish()
    }

    /// Records `value` for the series identified by `values` (same order as `label_names`),
    /// creating it if necessary.
    pub fn observe(&self, values: &[String], value: f64) {
        let now = self.clock.now();
        let mut children = self.children.lock();
        let child = children.entry(Self::key(values)).or_insert_with(|| Child {
            label_values: values.to_vec(),
            samples: Vec::new(),
        });
        child.samples.push((now, value));
    }

    /// Removes a series (called by the stale-sweep on TTL expiry).
    pub fn remove(&self, values: &[String]) {
        self.children.lock().remove(&Self::key(values));
    }

    /// Renders this summary's Prometheus text exposition lines, pruning samples older than
    /// `max_age` as it goes.
    pub fn encode_text(&self, out: &mut String) {
        let now = self.clock.now();
        let mut children = self.children.lock();

        if children.is_empty() {
            return;
        }

        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} summary", self.name);

        for child in children.values_mut() {
            let max_age = self.max_age;
            child
                .samples
                .retain(|(t, _)| max_age.is_zero() || now.duration_since(*t) <= max_age);

            let mut sorted: Vec<f64> = child.samples.iter().map(|(_, v)| *v).collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

            let label_str = self.render_labels(&child.label_values, None);
            for q in &self.quantiles {
                let v = percentile(&sorted, q.quantile);
                let ql = self.render_labels(&child.label_values, Some(q.quantile));
                let _ = writeln!(out, "{}{} {}", self.name, ql, fmt_f64(v));
            }

            let sum: f64 = sorted.iter().sum();
            let _ = writeln!(out, "{}_sum{} {}", self.name, label_str, fmt_f64(sum));
            let _ = writeln!(out, "{}_count{} {}", self.name, label_str, sorted.len());
        }
    }

    fn render_labels(&self, values: &[String], quantile: Option<f64>) -> String {
        if self.label_names.is_empty() && quantile.is_none() {
            return String::new();
        }

        let mut parts: Vec<String> = self
            .label_names
            .iter()
            .zip(values)
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect();

        if let Some(q) = quantile {
            parts.push(format!("quantile={:?}", fmt_f64(q)));
        }

        format!("{{{}}}", parts.join(","))
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn fmt_f64(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else {
        format!("{v}")
    }
}
