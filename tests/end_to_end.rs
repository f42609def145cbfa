//! Cross-module scenarios: a line in, a scrape-ready Prometheus series out.

use statsd_bridge::clock::SystemClock;
use statsd_bridge::exporter::Exporter;
use statsd_bridge::mapper::cache::CachePolicy;
use statsd_bridge::mapper::config::MapperConfig;
use statsd_bridge::mapper::Mapper;
use statsd_bridge::metrics::Metrics;
use statsd_bridge::parser::tags::DialectOptions;
use statsd_bridge::parser::Parser;
use statsd_bridge::queue::EventQueue;
use statsd_bridge::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    parser: Arc<Parser>,
    exporter: Exporter,
    registry: Arc<Registry>,
    sender: statsd_bridge::queue::QueueSender,
}

fn build_pipeline(yaml: &str) -> Pipeline {
    build_pipeline_with(yaml, false)
}

fn build_pipeline_with(yaml: &str, drop_unmapped: bool) -> Pipeline {
    let config = MapperConfig::from_yaml_str(yaml).unwrap();
    let mapper = Arc::new(Mapper::new(&config, CachePolicy::Lru, 1000).unwrap());

    let prom_registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::new(&prom_registry));
    let registry = Arc::new(Registry::new(prom_registry, Arc::new(SystemClock), Arc::clone(&metrics)));

    let parser = Arc::new(Parser::new(DialectOptions::default(), Arc::clone(&metrics)));
    let (sender, queue) = EventQueue::new(1000, 100, Duration::from_millis(20), Arc::clone(&metrics));
    let exporter = Exporter::new(queue, mapper, Arc::clone(&registry), metrics, drop_unmapped);

    Pipeline {
        parser,
        exporter,
        registry,
        sender,
    }
}

/// Feeds `lines` through the parser, drops the sender so the exporter's `run` loop drains and
/// terminates on its own, then returns the scraped text.
async fn drive(mut pipeline: Pipeline, lines: &[&[u8]]) -> String {
    for line in lines {
        for event in pipeline.parser.parse(line) {
            pipeline.sender.send(event);
        }
    }
    drop(pipeline.sender);
    pipeline.exporter.run().await;
    pipeline.registry.gather_text().unwrap()
}

#[tokio::test]
async fn s1_dispatcher_line_end_to_end() {
    let pipeline = build_pipeline(
        r#"
mappings:
  - match: "test.dispatcher.*.*.*"
    match_metric_type: counter
    name: "dispatcher_events"
    labels:
      processor: "$1"
      action: "$2"
      outcome: "$3"
      job: "test_dispatcher"
"#,
    );

    let text = drive(pipeline, &[b"test.dispatcher.FooProcessor.send.success:1|c"]).await;

    assert!(text.contains("dispatcher_events"));
    assert!(text.contains(r#"processor="FooProcessor""#));
    assert!(text.contains(r#"job="test_dispatcher""#));
}

#[tokio::test]
async fn p5_conflicting_types_for_same_name_are_rejected() {
    let pipeline = build_pipeline(
        r#"
mappings:
  - match: "dup.counter"
    match_metric_type: counter
    name: "dup_metric"
  - match: "dup.gauge"
    match_metric_type: gauge
    name: "dup_metric"
"#,
    );

    let text = drive(pipeline, &[b"dup.counter:1|c", b"dup.gauge:1|g"]).await;

    assert!(text.contains("dup_metric"));
    // only one type ever wins; the later, conflicting registration is rejected, not crashed.
    let type_lines: Vec<&str> = text.lines().filter(|l| l.starts_with("# TYPE dup_metric")).collect();
    assert_eq!(type_lines.len(), 1);
}

#[tokio::test]
async fn s2_dogstatsd_tags_and_sample_rate_roundtrip_through_registry() {
    let pipeline = build_pipeline(
        r#"
mappings:
  - match: "foo"
    match_metric_type: counter
    name: "foo_total"
"#,
    );

    let text = drive(pipeline, &[b"foo:100|c|@0.1|#tag1:bar,tag2:baz"]).await;

    assert!(text.contains("foo_total"));
    assert!(text.contains(r#"tag1="bar""#));
    assert!(text.contains(r#"tag2="baz""#));
    // sample rate 0.1 inflates the observed count of 100 to 1000.
    assert!(text.contains(" 1000"));
}

#[tokio::test]
async fn s2_unmapped_metric_registers_under_escaped_name() {
    let pipeline = build_pipeline("mappings: []\n");

    let text = drive(pipeline, &[b"foo:100|c|@0.1|#tag1:bar,tag2:baz"]).await;

    assert!(text.contains(r#"foo{tag1="bar",tag2="baz"} 1000"#));
}

#[tokio::test]
async fn drop_unmapped_mode_keeps_unmapped_metrics_out_of_scrape_output() {
    let pipeline = build_pipeline_with("mappings: []\n", true);

    let text = drive(pipeline, &[b"totally.unmapped:1|c"]).await;

    assert!(!text.contains("unmapped"));
}

#[tokio::test]
async fn drop_action_keeps_metric_out_of_scrape_output() {
    let pipeline = build_pipeline(
        r#"
mappings:
  - match: "noisy.*"
    name: "should_never_appear"
    action: drop
"#,
    );

    let text = drive(pipeline, &[b"noisy.thing:1|c"]).await;

    assert!(!text.contains("should_never_appear"));
}

#[tokio::test]
async fn global_labels_applied_to_every_mapped_series() {
    let pipeline = build_pipeline(
        r#"
global_labels:
  region: "test-region"
mappings:
  - match: "foo"
    match_metric_type: counter
    name: "foo_total"
"#,
    );

    let text = drive(pipeline, &[b"foo:1|c"]).await;

    assert!(text.contains(r#"region="test-region""#));
}

#[tokio::test]
async fn histogram_and_summary_targets_both_export() {
    let pipeline = build_pipeline(
        r#"
mappings:
  - match: "latency.histogram"
    match_metric_type: observer
    name: "latency_histogram_seconds"
    observer_type: histogram
  - match: "latency.summary"
    match_metric_type: observer
    name: "latency_summary_seconds"
    observer_type: summary
"#,
    );

    let text = drive(
        pipeline,
        &[b"latency.histogram:0.25|ms", b"latency.summary:0.25|ms"],
    )
    .await;

    assert!(text.contains("latency_histogram_seconds_bucket"));
    assert!(text.contains("latency_summary_seconds"));
    assert!(text.contains("latency_summary_seconds_sum"));
    assert!(text.contains("latency_summary_seconds_count"));
}
