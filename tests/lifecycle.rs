//! End-to-end lifecycle tests through the public API.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::num::NonZeroU64;
use std::time::{Duration, Instant};
use zipkin_aggregator::config::AggregatorConfigBuilder;
use zipkin_aggregator::event::{SERVER_RECV, SERVER_SEND};
use zipkin_aggregator::{
    AggregatorConfig, InMemoryTransport, LogEntry, TraceAggregator, LOG_CATEGORY,
};

fn decode(entry: &LogEntry) -> serde_json::Value {
    assert_eq!(entry.category, LOG_CATEGORY);
    let bytes = STANDARD.decode(&entry.message).expect("valid base64");
    serde_json::from_slice(&bytes).expect("valid span JSON")
}

fn build(config: AggregatorConfig) -> (TraceAggregator, InMemoryTransport) {
    let transport = InMemoryTransport::new();
    let aggregator = TraceAggregator::builder(transport.clone())
        .with_config(config)
        .with_local_addr("192.0.2.7:4000".parse().unwrap())
        .build()
        .expect("aggregator should start");
    (aggregator, transport)
}

fn config() -> AggregatorConfigBuilder {
    AggregatorConfigBuilder::default()
        .with_sample_rate(NonZeroU64::new(1).unwrap())
        .with_span_ttl(Duration::from_secs(30))
        .with_flush_interval(Duration::from_secs(2))
}

#[test]
fn completed_request_is_delivered_as_one_entry() {
    let (aggregator, transport) = build(config().build());

    aggregator.sample(7, "web", "get /users", 1_000);
    aggregator.binary_annotate(7, "http.status_code", 200_i32);
    aggregator.annotate(7, 2_500, SERVER_SEND);
    aggregator.force_flush().unwrap();

    let entries = transport.entries();
    assert_eq!(entries.len(), 1);
    let span = decode(&entries[0]);

    assert_eq!(span["id"], "0000000000000007");
    assert_eq!(span["name"], "get /users");
    assert!(span.get("parentId").is_none());

    // Newest record first.
    let annotations = span["annotations"].as_array().unwrap();
    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[0]["value"], SERVER_SEND);
    assert_eq!(annotations[0]["timestamp"], 2_500);
    assert_eq!(annotations[1]["value"], SERVER_RECV);
    assert_eq!(annotations[1]["timestamp"], 1_000);
    assert_eq!(annotations[1]["endpoint"]["serviceName"], "web");
    assert_eq!(annotations[1]["endpoint"]["ipv4"], "192.0.2.7");

    let binary = span["binaryAnnotations"].as_array().unwrap();
    assert_eq!(binary[0]["key"], "http.status_code");
    assert_eq!(binary[0]["value"], 200);

    aggregator.shutdown().unwrap();
}

#[test]
fn sampling_rate_thins_delivered_spans() {
    let (aggregator, transport) = build(
        config()
            .with_sample_rate(NonZeroU64::new(2).unwrap())
            .build(),
    );

    for id in 0..20 {
        aggregator.sample(id, "web", "op", 1_000);
        aggregator.annotate(id, 2_000, SERVER_SEND);
    }
    aggregator.force_flush().unwrap();

    assert_eq!(transport.entries().len(), 10);
    aggregator.shutdown().unwrap();
}

#[test]
fn child_span_shares_trace_and_references_parent() {
    let (aggregator, transport) = build(config().build());

    aggregator.sample(1, "web", "get /", 1_000);
    aggregator.create_child_span(2, 1);
    aggregator.annotate(2, 1_500, "cr");
    aggregator.annotate(1, 2_000, SERVER_SEND);
    aggregator.shutdown().unwrap();

    let entries = transport.entries();
    assert_eq!(entries.len(), 2);
    let spans: Vec<serde_json::Value> = entries.iter().map(decode).collect();

    let parent = spans.iter().find(|s| s["id"] == "0000000000000001").unwrap();
    let child = spans.iter().find(|s| s["id"] == "0000000000000002").unwrap();
    assert_eq!(child["traceId"], parent["traceId"]);
    assert_eq!(child["parentId"], "0000000000000001");
    assert!(child.get("name").is_none());
}

#[test]
fn span_without_terminal_annotation_expires_and_flushes() {
    let (aggregator, transport) = build(
        config()
            .with_span_ttl(Duration::from_millis(25))
            .with_flush_interval(Duration::from_millis(25))
            .build(),
    );

    aggregator.sample(1, "web", "stuck", 1_000);
    std::thread::sleep(Duration::from_millis(500));

    let entries = transport.entries();
    assert_eq!(entries.len(), 1);
    let span = decode(&entries[0]);
    assert_eq!(span["name"], "stuck");
    // Expiry delivers the span as observed, without a terminal record.
    let annotations = span["annotations"].as_array().unwrap();
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0]["value"], SERVER_RECV);

    aggregator.shutdown().unwrap();
}

#[test]
fn shutdown_delivers_spans_still_open() {
    let (aggregator, transport) = build(config().build());

    aggregator.sample(1, "web", "open at exit", 1_000);
    aggregator.shutdown().unwrap();

    assert_eq!(transport.entries().len(), 1);
    assert_eq!(decode(&transport.entries()[0])["name"], "open at exit");
}

#[test]
fn dropping_the_handle_flushes_open_spans() {
    let (aggregator, transport) = build(config().build());

    aggregator.sample(1, "web", "abandoned", 1_000);
    drop(aggregator);

    // The worker notices the disconnected channel, terminates what is
    // still open, and issues one final flush before exiting.
    let deadline = Instant::now() + Duration::from_secs(2);
    while transport.entries().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let entries = transport.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(decode(&entries[0])["name"], "abandoned");
}

#[test]
fn messages_are_single_line_base64() {
    let (aggregator, transport) = build(config().build());

    aggregator.sample(1, "web", "get /", 1_000);
    aggregator.annotate(1, 2_000, SERVER_SEND);
    aggregator.force_flush().unwrap();

    let entries = transport.entries();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].message.contains('\n'));
    assert!(STANDARD.decode(&entries[0].message).is_ok());

    aggregator.shutdown().unwrap();
}
