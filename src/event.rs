//! The [`Event`] type produced by the line parser and consumed by the exporter.

use std::collections::BTreeMap;

/// A set of sanitised label key/value pairs attached to a sample.
pub type Labels = BTreeMap<String, String>;

/// The kind of Prometheus series a [`Event`] ultimately maps to.
///
/// Matches the `match_metric_type` vocabulary in the mapping config: `counter`, `gauge`,
/// `observer`/`timer`, or the empty string (typeless, matches any kind).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MetricType {
    Counter,
    Gauge,
    Observer,
}

impl MetricType {
    /// The config-file spelling of this type, as accepted in `match_metric_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Observer => "observer",
        }
    }
}

/// A single typed metric sample, decoded from one StatsD wire sample.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Counter {
        name: String,
        value: f64,
        labels: Labels,
    },
    Gauge {
        name: String,
        value: f64,
        relative: bool,
        labels: Labels,
    },
    Observer {
        name: String,
        value: f64,
        labels: Labels,
    },
}

impl Event {
    /// The metric name this event was parsed against (before mapping).
    pub fn name(&self) -> &str {
        match self {
            Event::Counter { name, .. } => name,
            Event::Gauge { name, .. } => name,
            Event::Observer { name, .. } => name,
        }
    }

    /// The [`MetricType`] this event will be matched against in the mapper's FSM.
    pub fn metric_type(&self) -> MetricType {
        match self {
            Event::Counter { .. } => MetricType::Counter,
            Event::Gauge { .. } => MetricType::Gauge,
            Event::Observer { .. } => MetricType::Observer,
        }
    }

    /// The label set attached to this event.
    pub fn labels(&self) -> &Labels {
        match self {
            Event::Counter { labels, .. } => labels,
            Event::Gauge { labels, .. } => labels,
            Event::Observer { labels, .. } => labels,
        }
    }

    /// Mutable access to the label set, used to add global labels additively.
    pub fn labels_mut(&mut self) -> &mut Labels {
        match self {
            Event::Counter { labels, .. } => labels,
            Event::Gauge { labels, .. } => labels,
            Event::Observer { labels, .. } => labels,
        }
    }
}

/// A batch of events flushed together by the [`crate::queue::EventQueue`].
///
/// Order within a batch is preserved from the order events were queued.
pub type Batch = Vec<Event>;
