//! Line parser: turns a raw wire byte-stream into [`Event`]s.
//!
//! Never panics on malformed input. Every rejected line, sample, or tag is counted on the
//! ambient [`Metrics`] and the parser proceeds with whatever it could still recognise.

pub mod reason;
pub mod tags;

use crate::event::{Event, Labels, MetricType};
use crate::metrics::Metrics;
use reason::ParseErrorReason;
use std::sync::Arc;
use tags::DialectOptions;

/// Stateless, thread-safe StatsD line parser.
pub struct Parser {
    dialects: DialectOptions,
    metrics: Arc<Metrics>,
}

enum SampleType {
    Counter,
    Gauge,
    Ms,
    Histogram,
    Distribution,
}

impl Parser {
    pub fn new(dialects: DialectOptions, metrics: Arc<Metrics>) -> Self {
        Self { dialects, metrics }
    }

    fn error(&self, reason: ParseErrorReason) {
        self.metrics
            .events_error_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Parses a single line (already split from its enclosing packet on `\n`).
    pub fn parse(&self, line: &[u8]) -> Vec<Event> {
        self.metrics.lines_total.inc();

        if line.is_empty() {
            self.error(ParseErrorReason::MalformedLine);
            return Vec::new();
        }

        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => {
                self.error(ParseErrorReason::MalformedLine);
                return Vec::new();
            }
        };

        let Some((name_part, rest)) = line.split_once(':') else {
            self.error(ParseErrorReason::MalformedLine);
            return Vec::new();
        };

        if name_part.is_empty() || rest.is_empty() {
            self.error(ParseErrorReason::MalformedLine);
            return Vec::new();
        }

        let name_tags = tags::extract_name_tags(name_part, self.dialects);
        if name_tags.tag_errors > 0 {
            self.metrics.tag_errors_total.inc_by(name_tags.tag_errors);
        }
        if name_tags.had_tags {
            self.metrics.tags_total.inc_by(name_tags.tags.len() as u64);
        }

        let mut events = Vec::new();

        if self.dialects.dogstatsd && rest.contains("|#") {
            self.decode_sample(&name_tags, rest, &mut events);
            return events;
        }

        if let Some(pipe_idx) = rest.find('|') {
            let first_field = &rest[..pipe_idx];
            let after_first = &rest[pipe_idx + 1..];
            let second_field_end = after_first.find('|').unwrap_or(after_first.len());
            let second_field = &after_first[..second_field_end];

            if first_field.contains(':') && matches!(second_field, "ms" | "h" | "d") {
                let remainder = &after_first[second_field_end..]; // includes leading '|' or empty
                for value in first_field.split(':') {
                    if value.is_empty() {
                        self.error(ParseErrorReason::NotEnoughPartsAfterColon);
                        continue;
                    }
                    let full = format!("{value}|{second_field}{remainder}");
                    self.decode_sample(&name_tags, &full, &mut events);
                }
                return events;
            }
        }

        for piece in rest.split(':') {
            if piece.is_empty() {
                self.error(ParseErrorReason::NotEnoughPartsAfterColon);
                continue;
            }
            self.decode_sample(&name_tags, piece, &mut events);
        }

        events
    }

    fn decode_sample(&self, name_tags: &tags::NameTags, sample: &str, out: &mut Vec<Event>) {
        let parts: Vec<&str> = sample.split('|').collect();
        if !(2..=4).contains(&parts.len()) {
            self.error(ParseErrorReason::MalformedComponent);
            return;
        }

        let value_str = parts[0];
        let type_str = parts[1];

        let sample_type = match type_str {
            "c" => SampleType::Counter,
            "g" => SampleType::Gauge,
            "ms" => SampleType::Ms,
            "h" => SampleType::Histogram,
            "d" => SampleType::Distribution,
            "s" => {
                self.error(ParseErrorReason::IllegalEvent);
                return;
            }
            _ => {
                self.error(ParseErrorReason::IllegalEvent);
                return;
            }
        };

        let relative = value_str.starts_with('+') || value_str.starts_with('-');

        let value: f64 = match value_str.parse() {
            Ok(v) => v,
            Err(_) => {
                self.error(ParseErrorReason::MalformedValue);
                return;
            }
        };

        let mut rate = 1.0f64;
        let mut dogstatsd_tags: Option<Labels> = None;

        for extra in &parts[2..] {
            if let Some(rate_str) = extra.strip_prefix('@') {
                match rate_str.parse::<f64>() {
                    Ok(r) if r != 0.0 => rate = r,
                    Ok(_) => rate = 1.0,
                    Err(_) => self.error(ParseErrorReason::InvalidSampleFactor),
                }
            } else if let Some(tag_str) = extra.strip_prefix('#') {
                let (parsed, errs) = tags::parse_dogstatsd_tags(tag_str);
                if errs > 0 {
                    self.metrics.tag_errors_total.inc_by(errs);
                }
                self.metrics.tags_total.inc_by(parsed.len() as u64);
                dogstatsd_tags = Some(parsed);
            } else {
                self.error(ParseErrorReason::MalformedComponent);
                return;
            }
        }

        if name_tags.had_tags && dogstatsd_tags.is_some() {
            self.error(ParseErrorReason::MixedTaggingStyles);
            return;
        }

        let labels = dogstatsd_tags.unwrap_or_else(|| name_tags.tags.clone());

        self.metrics.samples_total.inc();

        match sample_type {
            SampleType::Counter => {
                let v = value / rate;
                out.push(Event::Counter {
                    name: name_tags.name.clone(),
                    value: v,
                    labels,
                });
                self.metrics
                    .events_total
                    .with_label_values(&[MetricType::Counter.as_str()])
                    .inc();
            }
            SampleType::Gauge => {
                out.push(Event::Gauge {
                    name: name_tags.name.clone(),
                    value,
                    relative,
                    labels,
                });
                self.metrics
                    .events_total
                    .with_label_values(&[MetricType::Gauge.as_str()])
                    .inc();
            }
            SampleType::Ms | SampleType::Histogram | SampleType::Distribution => {
                let scaled = if matches!(sample_type, SampleType::Ms) {
                    value / 1000.0
                } else {
                    value
                };

                let copies = if matches!(sample_type, SampleType::Ms | SampleType::Histogram | SampleType::Distribution)
                {
                    (1.0 / rate).floor().max(1.0) as usize
                } else {
                    1
                };

                for _ in 0..copies {
                    out.push(Event::Observer {
                        name: name_tags.name.clone(),
                        value: scaled,
                        labels: labels.clone(),
                    });
                }

                self.metrics
                    .events_total
                    .with_label_values(&[MetricType::Observer.as_str()])
                    .inc_by(copies as u64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_metrics;

    fn parser() -> Parser {
        Parser::new(DialectOptions::default(), test_metrics())
    }

    #[test]
    fn p2_counter_roundtrip() {
        let events = parser().parse(b"n:5|c");
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "n".into(),
                value: 5.0,
                labels: Labels::new()
            }]
        );
    }

    #[test]
    fn p3_timer_sample_rate_expansion() {
        let events = parser().parse(b"n:1|ms|@0.25");
        assert_eq!(events.len(), 4);
        for e in events {
            assert_eq!(
                e,
                Event::Observer {
                    name: "n".into(),
                    value: 0.001,
                    labels: Labels::new()
                }
            );
        }
    }

    #[test]
    fn p4_mixed_tagging_drops_sample() {
        let events = parser().parse(b"foo[k=v]:1|c|#other:tag");
        assert!(events.is_empty());
    }

    #[test]
    fn s1_plain_counter() {
        let events = parser().parse(b"test.dispatcher.FooProcessor.send.success:1|c");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "test.dispatcher.FooProcessor.send.success");
    }

    #[test]
    fn s2_dogstatsd_rate_and_tags() {
        let events = parser().parse(b"foo:100|c|@0.1|#tag1:bar,#tag2:baz");
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Counter { name, value, labels } => {
                assert_eq!(name, "foo");
                assert_eq!(*value, 1000.0);
                assert_eq!(labels.get("tag1").map(String::as_str), Some("bar"));
                assert_eq!(labels.get("tag2").map(String::as_str), Some("baz"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn s3_timing_sample_rate() {
        let events = parser().parse(b"foo.timing:0.5|ms|@0.1");
        assert_eq!(events.len(), 10);
        for e in &events {
            assert_eq!(e.name(), "foo.timing");
            match e {
                Event::Observer { value, .. } => assert!((value - 0.0005).abs() < 1e-9),
                _ => panic!("expected observer"),
            }
        }
    }

    #[test]
    fn s4_bad_utf8_line_is_soft_error() {
        let mut line = b"bar:200|c|#tag:".to_vec();
        line.extend_from_slice(&[0xc3, 0x28]);
        line.extend_from_slice(b"invalid");
        let events = parser().parse(&line);
        assert!(events.is_empty());
    }

    #[test]
    fn s6_multi_sample_and_extended_timing() {
        let events = parser().parse(b"foo:200|ms:300|ms:5|c|@0.1:6|g");
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            Event::Observer {
                name: "foo".into(),
                value: 0.2,
                labels: Labels::new()
            }
        );
        assert_eq!(
            events[1],
            Event::Observer {
                name: "foo".into(),
                value: 0.3,
                labels: Labels::new()
            }
        );
        assert_eq!(
            events[2],
            Event::Counter {
                name: "foo".into(),
                value: 50.0,
                labels: Labels::new()
            }
        );
        assert_eq!(
            events[3],
            Event::Gauge {
                name: "foo".into(),
                value: 6.0,
                relative: false,
                labels: Labels::new()
            }
        );

        let events2 = parser().parse(b"bar:1|c:5|ms");
        assert_eq!(
            events2,
            vec![
                Event::Counter {
                    name: "bar".into(),
                    value: 1.0,
                    labels: Labels::new()
                },
                Event::Observer {
                    name: "bar".into(),
                    value: 0.005,
                    labels: Labels::new()
                },
            ]
        );
    }
}
