//! Ambient, fixed-cardinality telemetry counters for the bridge's own operation.
//!
//! These are distinct from the dynamically-named series the [`crate::registry`] creates from
//! mapping rules: their names and label sets are known at compile time, so they're built once
//! in [`Metrics::new`] and injected into
//! every component that needs to bump them, rather than reached for through a global.

use prometheus::{Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry};

/// All process-wide operational counters, registered on a shared [`Registry`].
pub struct Metrics {
    pub lines_total: IntCounter,
    pub samples_total: IntCounter,
    pub tags_total: IntCounter,
    pub tag_errors_total: IntCounter,
    pub events_total: IntCounterVec,
    pub events_unmapped_total: IntCounter,
    pub events_actions_total: IntCounterVec,
    pub events_error_total: IntCounterVec,
    pub events_conflict_total: IntCounterVec,
    pub udp_packets_total: IntCounter,
    pub tcp_connections_total: IntCounter,
    pub tcp_connection_errors_total: IntCounter,
    pub tcp_too_long_lines_total: IntCounter,
    pub unixgram_packets_total: IntCounter,
    pub event_queue_flushed_total: IntCounter,
    pub loaded_mappings: Gauge,
    pub metrics_total: GaugeVec,
    pub config_reloads_total: IntCounterVec,
    pub relay_long_lines_total: IntCounter,
}

macro_rules! register_int_counter {
    ($registry:expr, $name:expr, $help:expr) => {{
        let c = IntCounter::new($name, $help).expect("static metric definition is valid");
        $registry
            .register(Box::new(c.clone()))
            .expect("ambient metric name collision");
        c
    }};
}

macro_rules! register_gauge {
    ($registry:expr, $name:expr, $help:expr) => {{
        let g = Gauge::new($name, $help).expect("static metric definition is valid");
        $registry
            .register(Box::new(g.clone()))
            .expect("ambient metric name collision");
        g
    }};
}

macro_rules! register_int_counter_vec {
    ($registry:expr, $name:expr, $help:expr, $labels:expr) => {{
        let c = IntCounterVec::new(Opts::new($name, $help), $labels)
            .expect("static metric definition is valid");
        $registry
            .register(Box::new(c.clone()))
            .expect("ambient metric name collision");
        c
    }};
}

impl Metrics {
    /// Builds and registers every ambient counter on `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            lines_total: register_int_counter!(registry, "lines_total", "Total number of StatsD lines received"),
            samples_total: register_int_counter!(registry, "samples_total", "Total number of StatsD samples received"),
            tags_total: register_int_counter!(registry, "tags_total", "Total number of tags recognised"),
            tag_errors_total: register_int_counter!(registry, "tag_errors_total", "Total number of errors while parsing tags"),
            events_total: register_int_counter_vec!(
                registry,
                "events_total",
                "Total number of events processed",
                &["type"]
            ),
            events_unmapped_total: register_int_counter!(
                registry,
                "events_unmapped_total",
                "Total number of events that did not match any mapping"
            ),
            events_actions_total: register_int_counter_vec!(
                registry,
                "events_actions_total",
                "Total number of events by the action applied to them",
                &["action"]
            ),
            events_error_total: register_int_counter_vec!(
                registry,
                "events_error_total",
                "Total number of errors while processing events, by reason",
                &["reason"]
            ),
            events_conflict_total: register_int_counter_vec!(
                registry,
                "events_conflict_total",
                "Total number of events discarded due to metric type conflicts",
                &["type"]
            ),
            udp_packets_total: register_int_counter!(registry, "udp_packets_total", "Total number of UDP packets received"),
            tcp_connections_total: register_int_counter!(registry, "tcp_connections_total", "Total number of TCP connections accepted"),
            tcp_connection_errors_total: register_int_counter!(
                registry,
                "tcp_connection_errors_total",
                "Total number of TCP connection errors"
            ),
            tcp_too_long_lines_total: register_int_counter!(
                registry,
                "tcp_too_long_lines_total",
                "Total number of lines discarded for being too long over TCP"
            ),
            unixgram_packets_total: register_int_counter!(
                registry,
                "unixgram_packets_total",
                "Total number of unixgram packets received"
            ),
            event_queue_flushed_total: register_int_counter!(
                registry,
                "event_queue_flushed_total",
                "Total number of times the event queue was flushed"
            ),
            loaded_mappings: register_gauge!(registry, "loaded_mappings", "The current number of loaded mappings"),
            metrics_total: {
                let g = GaugeVec::new(Opts::new("metrics_total", "Current number of registered series, by type"), &["type"])
                    .expect("static metric definition is valid");
                registry
                    .register(Box::new(g.clone()))
                    .expect("ambient metric name collision");
                g
            },
            config_reloads_total: register_int_counter_vec!(
                registry,
                "config_reloads_total",
                "Total number of config reloads, by outcome",
                &["outcome"]
            ),
            relay_long_lines_total: register_int_counter!(
                registry,
                "relay_long_lines_total",
                "Total number of lines dropped by the relay for exceeding the packet length budget"
            ),
        }
    }
}

#[cfg(test)]
pub fn test_metrics() -> std::sync::Arc<Metrics> {
    std::sync::Arc::new(Metrics::new(&Registry::new()))
}
