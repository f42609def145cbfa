//! Drains the [`crate::queue::EventQueue`], resolves each event against the [`crate::mapper`],
//! and writes the result into the [`crate::registry::Registry`].

use crate::event::{Event, Labels};
use crate::mapper::config::{Action, ObserverType};
use crate::mapper::rule::MappingRule;
use crate::mapper::Mapper;
use crate::metrics::Metrics;
use crate::queue::EventQueue;
use crate::registry::Registry;
use std::sync::Arc;

/// Owns the consumer side of the pipeline: one `run` call per process, looping until the
/// queue's sender side is dropped.
pub struct Exporter {
    queue: EventQueue,
    mapper: Arc<Mapper>,
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
    drop_unmapped: bool,
    unmapped_rule: MappingRule,
}

impl Exporter {
    pub fn new(
        queue: EventQueue,
        mapper: Arc<Mapper>,
        registry: Arc<Registry>,
        metrics: Arc<Metrics>,
        drop_unmapped: bool,
    ) -> Self {
        Self {
            queue,
            mapper,
            registry,
            metrics,
            drop_unmapped,
            unmapped_rule: MappingRule::unmapped(),
        }
    }

    /// Runs until the queue closes. Every batch flush is followed by a stale-sweep pass, since
    /// the queue guarantees a flush at least once per `flush_interval` even when idle.
    pub async fn run(&mut self) {
        while let Some(batch) = self.queue.next_batch().await {
            for event in batch {
                self.process(event);
            }
            self.registry.remove_stale_metrics();
            self.metrics.event_queue_flushed_total.inc();
        }
    }

    fn process(&self, mut event: Event) {
        self.metrics
            .events_total
            .with_label_values(&[event.metric_type().as_str()])
            .inc();

        let global_labels = self.mapper.global_labels();
        for (k, v) in global_labels {
            event.labels_mut().entry(k).or_insert(v);
        }

        let resolution = self.mapper.get_mapping(event.name(), event.metric_type());

        let (target_name, labels, rule): (String, Labels, &MappingRule) = match &resolution {
            Some(resolution) => {
                let rule = resolution.rule();
                if rule.action == Action::Drop {
                    self.metrics
                        .events_actions_total
                        .with_label_values(&["drop"])
                        .inc();
                    return;
                }
                self.metrics
                    .events_actions_total
                    .with_label_values(&["map"])
                    .inc();

                let mut labels = event.labels().clone();
                for (k, v) in resolution.labels() {
                    labels.insert(k, v);
                }
                (resolution.target_name(), labels, rule)
            }
            None => {
                self.metrics.events_unmapped_total.inc();
                if self.drop_unmapped {
                    return;
                }
                (escape_name(event.name()), event.labels().clone(), &self.unmapped_rule)
            }
        };

        let result = match &event {
            Event::Counter { value, .. } => {
                if *value < 0.0 {
                    self.metrics
                        .events_error_total
                        .with_label_values(&["negative_counter"])
                        .inc();
                    return;
                }
                self.registry
                    .get_counter(&target_name, &labels, &rule.help_text, rule)
                    .map(|c| c.inc_by(*value))
            }
            Event::Gauge { value, relative, .. } => self
                .registry
                .get_gauge(&target_name, &labels, &rule.help_text, rule)
                .map(|g| {
                    if *relative {
                        g.add(*value);
                    } else {
                        g.set(*value);
                    }
                }),
            Event::Observer { value, .. } => {
                let observed = match rule.observer_type {
                    ObserverType::Histogram => {
                        self.registry.get_histogram(&target_name, &labels, &rule.help_text, rule)
                    }
                    ObserverType::Summary | ObserverType::Default => {
                        self.registry.get_summary(&target_name, &labels, &rule.help_text, rule)
                    }
                };
                observed.map(|o| o.observe(*value))
            }
        };

        if let Err(conflict) = result {
            self.metrics
                .events_conflict_total
                .with_label_values(&[event.metric_type().as_str()])
                .inc();
            self.metrics
                .events_error_total
                .with_label_values(&["metric_conflict"])
                .inc();
            drop(conflict);
        }
    }
}

/// Escapes a metric name with no matching rule so it can still be registered: any byte outside
/// `[A-Za-z0-9_]` becomes `_`, and a leading digit gets an `_` prefix.
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.push('_');
    }
    for c in name.chars() {
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
    use crate::clock::SystemClock;
    use crate::mapper::cache::CachePolicy;
    use crate::mapper::config::MapperConfig;
    use crate::queue::EventQueue;
    use std::time::Duration;

    fn setup(yaml: &str, drop_unmapped: bool) -> (Exporter, crate::queue::QueueSender, Arc<Registry>) {
        let config = MapperConfig::from_yaml_str(yaml).unwrap();
        let mapper = Arc::new(Mapper::new(&config, CachePolicy::Lru, 1000).unwrap());
        let metrics = crate::metrics::test_metrics();
        let registry = Arc::new(Registry::new(
            prometheus::Registry::new(),
            Arc::new(SystemClock),
            Arc::clone(&metrics),
        ));
        let (tx, queue) = EventQueue::new(1000, 8, Duration::from_millis(20), Arc::clone(&metrics));
        (
            Exporter::new(queue, mapper, Arc::clone(&registry), metrics, drop_unmapped),
            tx,
            registry,
        )
    }

    #[tokio::test]
    async fn s1_plain_counter_exported() {
        let (mut exporter, tx, registry) = setup(
            r#"
mappings:
  - match: "test.*"
    match_metric_type: counter
    name: "test_total"
    labels:
      part: "$1"
"#,
            false,
        );
        tx.send(Event::Counter {
            name: "test.foo".into(),
            value: 3.0,
            labels: Labels::new(),
        });

        let batch = exporter.queue.next_batch().await.unwrap();
        for e in batch {
            exporter.process(e);
        }

        let text = registry.gather_text().unwrap();
        assert!(text.contains("test_total"));
        assert!(text.contains("part=\"foo\""));
    }

    #[tokio::test]
    async fn unmapped_event_registers_under_escaped_name() {
        let (mut exporter, tx, registry) = setup("mappings: []\n", false);
        tx.send(Event::Counter {
            name: "foo".into(),
            value: 100.0,
            labels: [("tag1".to_owned(), "bar".to_owned()), ("tag2".to_owned(), "baz".to_owned())]
                .into_iter()
                .collect(),
        });

        let batch = exporter.queue.next_batch().await.unwrap();
        for e in batch {
            exporter.process(e);
        }
        assert_eq!(exporter.metrics.events_unmapped_total.get(), 1);
        let text = registry.gather_text().unwrap();
        assert!(text.contains("foo{"));
        assert!(text.contains(r#"tag1="bar""#));
        assert!(text.contains(r#"tag2="baz""#));
    }

    #[tokio::test]
    async fn unmapped_event_escapes_illegal_characters_and_leading_digit() {
        let (mut exporter, tx, registry) = setup("mappings: []\n", false);
        tx.send(Event::Counter {
            name: "9weird.na-me".into(),
            value: 1.0,
            labels: Labels::new(),
        });

        let batch = exporter.queue.next_batch().await.unwrap();
        for e in batch {
            exporter.process(e);
        }
        let text = registry.gather_text().unwrap();
        assert!(text.contains("_9weird_na_me"));
    }

    #[tokio::test]
    async fn drop_unmapped_mode_discards_instead_of_registering() {
        let (mut exporter, tx, registry) = setup("mappings: []\n", true);
        tx.send(Event::Counter {
            name: "nothing.matches".into(),
            value: 1.0,
            labels: Labels::new(),
        });

        let batch = exporter.queue.next_batch().await.unwrap();
        for e in batch {
            exporter.process(e);
        }
        assert_eq!(exporter.metrics.events_unmapped_total.get(), 1);
        assert!(!registry.gather_text().unwrap().contains("nothing"));
    }

    #[tokio::test]
    async fn drop_action_short_circuits_before_registry() {
        let (mut exporter, tx, registry) = setup(
            r#"
mappings:
  - match: "noisy.*"
    name: "unused"
    action: drop
"#,
            false,
        );
        tx.send(Event::Counter {
            name: "noisy.thing".into(),
            value: 1.0,
            labels: Labels::new(),
        });

        let batch = exporter.queue.next_batch().await.unwrap();
        for e in batch {
            exporter.process(e);
        }
        assert_eq!(exporter.metrics.events_unmapped_total.get(), 0);
        assert_eq!(
            exporter
                .metrics
                .events_actions_total
                .with_label_values(&["drop"])
                .get(),
            1
        );
        assert!(!registry.gather_text().unwrap().contains("unused"));
    }

    #[tokio::test]
    async fn negative_counter_value_is_rejected() {
        let (mut exporter, tx, _registry) = setup(
            r#"
mappings:
  - match: "bad.*"
    match_metric_type: counter
    name: "bad_total"
"#,
            false,
        );
        tx.send(Event::Counter {
            name: "bad.thing".into(),
            value: -1.0,
            labels: Labels::new(),
        });

        let batch = exporter.queue.next_batch().await.unwrap();
        for e in batch {
            exporter.process(e);
        }
        assert_eq!(
            exporter
                .metrics
                .events_error_total
                .with_label_values(&["negative_counter"])
                .get(),
            1
        );
    }
}
