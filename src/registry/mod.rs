//! The metric registry: creates/reuses Prometheus vectors, enforces name/type exclusivity,
//! hashes label-sets, and evicts stale series by TTL.

pub mod hash;
pub mod summary;

use crate::clock::Clock;
use crate::mapper::rule::MappingRule;
use crate::metrics::Metrics;
use parking_lot::Mutex;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use summary::SummaryVec;
use thiserror::Error;

/// A metric name is bound to exactly one Prometheus type for its lifetime; histogram and
/// summary additionally reserve their `_sum`/`_count`/`_bucket` suffix siblings.
#[derive(Debug, Error)]
#[error("metric {name:?} is already registered as {existing:?}, refusing to register as {requested:?}")]
pub struct ConflictError {
    pub name: String,
    pub existing: DeclaredType,
    pub requested: DeclaredType,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeclaredType {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl DeclaredType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclaredType::Counter => "counter",
            DeclaredType::Gauge => "gauge",
            DeclaredType::Histogram => "histogram",
            DeclaredType::Summary => "summary",
        }
    }
}

enum VecHolder {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
    Summary(Arc<SummaryVec>),
}

struct VectorRef {
    vec: VecHolder,
    ref_count: u64,
}

struct RegisteredMetric {
    label_values: Vec<String>,
    ttl: Duration,
    last_registered_at: Instant,
    vec_key: u64,
}

struct MetricGroup {
    declared_type: DeclaredType,
    vectors: HashMap<u64, VectorRef>,
    metrics: HashMap<u64, RegisteredMetric>,
}

impl MetricGroup {
    fn new(declared_type: DeclaredType) -> Self {
        Self {
            declared_type,
            vectors: HashMap::new(),
            metrics: HashMap::new(),
        }
    }
}

/// A handle to a concrete counter. Thin wrapper so callers don't need to import `prometheus`.
pub type CounterHandle = prometheus::Counter;
/// A handle to a concrete gauge.
pub type GaugeHandle = prometheus::Gauge;

/// A handle to a concrete histogram or summary series.
#[derive(Clone)]
pub enum ObserverHandle {
    Histogram(prometheus::Histogram),
    Summary(Arc<SummaryVec>, Vec<String>),
}

impl ObserverHandle {
    pub fn observe(&self, value: f64) {
        match self {
            ObserverHandle::Histogram(h) => h.observe(value),
            ObserverHandle::Summary(s, values) => s.observe(values, value),
        }
    }
}

/// The metric registry. A single mutex protects `groups`; the scratch label-sort buffer lives
/// on the call stack rather than as a registry field.
pub struct Registry {
    prom_registry: prometheus::Registry,
    groups: Mutex<HashMap<String, MetricGroup>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl Registry {
    pub fn new(prom_registry: prometheus::Registry, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        Self {
            prom_registry,
            groups: Mutex::new(HashMap::new()),
            clock,
            metrics,
        }
    }

    fn check_conflict(
        groups: &HashMap<String, MetricGroup>,
        name: &str,
        requested: DeclaredType,
    ) -> Result<(), ConflictError> {
        if let Some(g) = groups.get(name) {
            if g.declared_type != requested {
                return Err(ConflictError {
                    name: name.to_owned(),
                    existing: g.declared_type,
                    requested,
                });
            }
        }

        if matches!(requested, DeclaredType::Histogram | DeclaredType::Summary) {
            for suffix in ["_sum", "_count", "_bucket"] {
                let reserved = format!("{name}{suffix}");
                if let Some(g) = groups.get(&reserved) {
                    return Err(ConflictError {
                        name: reserved,
                        existing: g.declared_type,
                        requested,
                    });
                }
            }
        } else {
            for suffix in ["_sum", "_count", "_bucket"] {
                if let Some(base) = name.strip_suffix(suffix) {
                    if let Some(g) = groups.get(base) {
                        if matches!(g.declared_type, DeclaredType::Histogram | DeclaredType::Summary) {
                            return Err(ConflictError {
                                name: name.to_owned(),
                                existing: g.declared_type,
                                requested,
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn sorted_names_and_values(labels: &crate::event::Labels) -> (Vec<String>, Vec<String>) {
        let names: Vec<String> = labels.keys().cloned().collect();
        let values: Vec<String> = labels.values().cloned().collect();
        (names, values)
    }

    fn touch(
        &self,
        group: &mut MetricGroup,
        names_key: u64,
        values_key: u64,
        label_values: &[String],
        ttl: Duration,
    ) {
        let now = self.clock.now();
        group
            .metrics
            .entry(values_key)
            .and_modify(|m| m.last_registered_at = now)
            .or_insert_with(|| {
                if let Some(v) = group.vectors.get_mut(&names_key) {
                    v.ref_count += 1;
                }
                RegisteredMetric {
                    label_values: label_values.to_vec(),
                    ttl,
                    last_registered_at: now,
                    vec_key: names_key,
                }
            });
    }

    pub fn get_counter(
        &self,
        name: &str,
        labels: &crate::event::Labels,
        help: &str,
        rule: &MappingRule,
    ) -> Result<CounterHandle, ConflictError> {
        let (names, values) = Self::sorted_names_and_values(labels);
        let names_key = hash::names_hash(&names);
        let values_key = hash::values_hash(&names, &values);

        let mut groups = self.groups.lock();
        Self::check_conflict(&groups, name, DeclaredType::Counter)?;

        let group = groups
            .entry(name.to_owned())
            .or_insert_with(|| MetricGroup::new(DeclaredType::Counter));

        if !group.vectors.contains_key(&names_key) {
            let cv = CounterVec::new(Opts::new(name, help), &names.iter().map(String::as_str).collect::<Vec<_>>())
                .expect("metric name/label validated at mapping-load time");
            let _ = self.prom_registry.register(Box::new(cv.clone()));
            group.vectors.insert(
                names_key,
                VectorRef {
                    vec: VecHolder::Counter(cv),
                    ref_count: 0,
                },
            );
            self.metrics.metrics_total.with_label_values(&["counter"]).inc();
        }

        self.touch(group, names_key, values_key, &values, rule.ttl);

        match &group.vectors.get(&names_key).unwrap().vec {
            VecHolder::Counter(cv) => Ok(cv.with_label_values(&values.iter().map(String::as_str).collect::<Vec<_>>())),
            _ => unreachable!("vector type fixed at creation"),
        }
    }

    pub fn get_gauge(
        &self,
        name: &str,
        labels: &crate::event::Labels,
        help: &str,
        rule: &MappingRule,
    ) -> Result<GaugeHandle, ConflictError> {
        let (names, values) = Self::sorted_names_and_values(labels);
        let names_key = hash::names_hash(&names);
        let values_key = hash::values_hash(&names, &values);

        let mut groups = self.groups.lock();
        Self::check_conflict(&groups, name, DeclaredType::Gauge)?;

        let group = groups
            .entry(name.to_owned())
            .or_insert_with(|| MetricGroup::new(DeclaredType::Gauge));

        if !group.vectors.contains_key(&names_key) {
            let gv = GaugeVec::new(Opts::new(name, help), &names.iter().map(String::as_str).collect::<Vec<_>>())
                .expect("metric name/label validated at mapping-load time");
            let _ = self.prom_registry.register(Box::new(gv.clone()));
            group.vectors.insert(
                names_key,
                VectorRef {
                    vec: VecHolder::Gauge(gv),
                    ref_count: 0,
                },
            );
            self.metrics.metrics_total.with_label_values(&["gauge"]).inc();
        }

        self.touch(group, names_key, values_key, &values, rule.ttl);

        match &group.vectors.get(&names_key).unwrap().vec {
            VecHolder::Gauge(gv) => Ok(gv.with_label_values(&values.iter().map(String::as_str).collect::<Vec<_>>())),
            _ => unreachable!("vector type fixed at creation"),
        }
    }

    pub fn get_histogram(
        &self,
        name: &str,
        labels: &crate::event::Labels,
        help: &str,
        rule: &MappingRule,
    ) -> Result<ObserverHandle, ConflictError> {
        let (names, values) = Self::sorted_names_and_values(labels);
        let names_key = hash::names_hash(&names);
        let values_key = hash::values_hash(&names, &values);

        let mut groups = self.groups.lock();
        Self::check_conflict(&groups, name, DeclaredType::Histogram)?;

        let group = groups
            .entry(name.to_owned())
            .or_insert_with(|| MetricGroup::new(DeclaredType::Histogram));

        if !group.vectors.contains_key(&names_key) {
            let hv = HistogramVec::new(
                HistogramOpts::new(name, help).buckets(rule.histogram_buckets.clone()),
                &names.iter().map(String::as_str).collect::<Vec<_>>(),
            )
            .expect("metric name/label validated at mapping-load time");
            let _ = self.prom_registry.register(Box::new(hv.clone()));
            group.vectors.insert(
                names_key,
                VectorRef {
                    vec: VecHolder::Histogram(hv),
                    ref_count: 0,
                },
            );
            self.metrics.metrics_total.with_label_values(&["histogram"]).inc();
        }

        self.touch(group, names_key, values_key, &values, rule.ttl);

        match &group.vectors.get(&names_key).unwrap().vec {
            VecHolder::Histogram(hv) => Ok(ObserverHandle::Histogram(
                hv.with_label_values(&values.iter().map(String::as_str).collect::<Vec<_>>()),
            )),
            _ => unreachable!("vector type fixed at creation"),
        }
    }

    pub fn get_summary(
        &self,
        name: &str,
        labels: &crate::event::Labels,
        help: &str,
        rule: &MappingRule,
    ) -> Result<ObserverHandle, ConflictError> {
        let (names, values) = Self::sorted_names_and_values(labels);
        let names_key = hash::names_hash(&names);
        let values_key = hash::values_hash(&names, &values);

        let mut groups = self.groups.lock();
        Self::check_conflict(&groups, name, DeclaredType::Summary)?;

        let group = groups
            .entry(name.to_owned())
            .or_insert_with(|| MetricGroup::new(DeclaredType::Summary));

        if !group.vectors.contains_key(&names_key) {
            let sv = Arc::new(SummaryVec::new(
                name,
                help,
                names.clone(),
                rule.summary_quantiles.clone(),
                rule.summary_max_age,
                Arc::clone(&self.clock),
            ));
            group.vectors.insert(
                names_key,
                VectorRef {
                    vec: VecHolder::Summary(sv),
                    ref_count: 0,
                },
            );
            self.metrics.metrics_total.with_label_values(&["summary"]).inc();
        }

        self.touch(group, names_key, values_key, &values, rule.ttl);

        match &group.vectors.get(&names_key).unwrap().vec {
            VecHolder::Summary(sv) => Ok(ObserverHandle::Summary(Arc::clone(sv), values.clone())),
            _ => unreachable!("vector type fixed at creation"),
        }
    }

    /// Evicts series whose TTL has elapsed since their last observation. Runs once a second from the exporter loop.
    pub fn remove_stale_metrics(&self) {
        let now = self.clock.now();
        let mut groups = self.groups.lock();

        for group in groups.values_mut() {
            let mut expired_values_keys = Vec::new();

            for (&values_key, m) in group.metrics.iter() {
                if !m.ttl.is_zero() && now.duration_since(m.last_registered_at) >= m.ttl {
                    expired_values_keys.push(values_key);
                }
            }

            for values_key in expired_values_keys {
                let Some(m) = group.metrics.remove(&values_key) else {
                    continue;
                };

                if let Some(v) = group.vectors.get_mut(&m.vec_key) {
                    let value_refs: Vec<&str> = m.label_values.iter().map(String::as_str).collect();
                    match &v.vec {
                        VecHolder::Counter(cv) => {
                            let _ = cv.remove_label_values(&value_refs);
                        }
                        VecHolder::Gauge(gv) => {
                            let _ = gv.remove_label_values(&value_refs);
                        }
                        VecHolder::Histogram(hv) => {
                            let _ = hv.remove_label_values(&value_refs);
                        }
                        VecHolder::Summary(sv) => {
                            sv.remove(&m.label_values);
                        }
                    }
                    v.ref_count = v.ref_count.saturating_sub(1);
                    self.metrics
                        .metrics_total
                        .with_label_values(&[group.declared_type.as_str()])
                        .dec();
                }
            }
        }
    }

    /// Collects both the ambient counters and every dynamically-created vector into Prometheus
    /// text exposition format.
    pub fn gather_text(&self) -> anyhow::Result<String> {
        use prometheus::{Encoder, TextEncoder};

        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.prom_registry.gather(), &mut buf)?;
        let mut out = String::from_utf8(buf)?;

        let groups = self.groups.lock();
        for group in groups.values() {
            for v in group.vectors.values() {
                if let VecHolder::Summary(sv) = &v.vec {
                    sv.encode_text(&mut out);
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::event::Labels;
    use crate::mapper::config::Action;
    use crate::mapper::rule::{default_histogram_buckets, default_summary_quantiles};
    use crate::mapper::template::TemplateFormatter;
    use std::collections::BTreeMap;

    fn dummy_rule(ttl: Duration) -> MappingRule {
        MappingRule {
            priority: 0,
            match_type: crate::mapper::config::MatchType::Glob,
            match_metric_type: None,
            raw_pattern: "x".into(),
            name_template: TemplateFormatter::compile("x"),
            label_templates: BTreeMap::new(),
            observer_type: crate::mapper::config::ObserverType::Default,
            histogram_buckets: default_histogram_buckets(),
            summary_quantiles: default_summary_quantiles(),
            summary_max_age: Duration::from_secs(600),
            summary_age_buckets: 5,
            ttl,
            action: Action::Map,
            help_text: "help".into(),
        }
    }

    fn registry() -> (Registry, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        let metrics = crate::metrics::test_metrics();
        (
            Registry::new(prometheus::Registry::new(), clock.clone(), metrics),
            clock,
        )
    }

    #[test]
    fn p5_conflict_on_type_change() {
        let (reg, _clock) = registry();
        let rule = dummy_rule(Duration::ZERO);
        let labels = Labels::new();

        reg.get_counter("x", &labels, "help", &rule).unwrap();
        let err = reg.get_gauge("x", &labels, "help", &rule).unwrap_err();
        assert_eq!(err.existing, DeclaredType::Counter);
    }

    #[test]
    fn p6_ttl_expiry() {
        let (reg, clock) = registry();
        let rule = dummy_rule(Duration::from_secs(1));
        let labels = Labels::new();

        reg.get_gauge("g", &labels, "help", &rule).unwrap();
        assert!(reg.gather_text().unwrap().contains('\n'));

        clock.advance(Duration::from_millis(500));
        reg.remove_stale_metrics();
        // not yet expired
        let groups = reg.groups.lock();
        assert_eq!(groups.get("g").unwrap().metrics.len(), 1);
        drop(groups);

        clock.advance(Duration::from_millis(600));
        reg.remove_stale_metrics();
        let groups = reg.groups.lock();
        assert_eq!(groups.get("g").unwrap().metrics.len(), 0);
    }

    #[test]
    fn histogram_and_counter_distinct_names_ok() {
        let (reg, _clock) = registry();
        let rule = dummy_rule(Duration::ZERO);
        let labels = Labels::new();

        reg.get_histogram("h", &labels, "help", &rule).unwrap();
        reg.get_counter("h_other", &labels, "help", &rule).unwrap();
    }

    #[test]
    fn histogram_reserves_sum_count_bucket_suffixes() {
        let (reg, _clock) = registry();
        let rule = dummy_rule(Duration::ZERO);
        let labels = Labels::new();

        reg.get_histogram("h", &labels, "help", &rule).unwrap();
        let err = reg.get_counter("h_sum", &labels, "help", &rule).unwrap_err();
        assert_eq!(err.requested, DeclaredType::Counter);
    }
}
