use std::collections::HashSet;
use std::time::Duration;

use opentelemetry::trace::{SpanId, TracerProvider as _};
use opentelemetry::Value;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use tokio_util::sync::CancellationToken;

use spanstorm::{emit_trace, TracingConfig};

fn test_provider() -> (InMemorySpanExporter, SdkTracerProvider) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (exporter, provider)
}

fn shape(depth: u32, children: u32, min_ms: u64, max_ms: u64) -> TracingConfig {
    TracingConfig {
        trace_depth: depth,
        children_per_node: children,
        min_child_duration_ms: min_ms,
        max_child_duration_ms: max_ms,
        ..TracingConfig::default()
    }
}

async fn generate(config: &TracingConfig) -> Vec<SpanData> {
    let (exporter, provider) = test_provider();
    let tracer = provider.tracer("test");
    emit_trace(&tracer, config, &CancellationToken::new()).await;
    exporter.get_finished_spans().expect("in-memory exporter")
}

fn attr<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

#[tokio::test(start_paused = true)]
async fn depth_two_fanout_two_yields_seven_spans() {
    let spans = generate(&shape(2, 2, 10, 10)).await;
    assert_eq!(spans.len(), 7);

    let roots: Vec<_> = spans
        .iter()
        .filter(|s| s.parent_span_id == SpanId::INVALID)
        .collect();
    assert_eq!(roots.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn node_count_matches_geometric_sum() {
    for (depth, children) in [(1u32, 1u32), (1, 3), (2, 3), (3, 2)] {
        let spans = generate(&shape(depth, children, 1, 1)).await;
        let expected: u64 = (1..=depth).map(|level| u64::from(children).pow(level)).sum();
        assert_eq!(
            spans.len() as u64,
            expected + 1,
            "depth={depth} children={children}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn parent_links_resolve_within_the_tree() {
    let spans = generate(&shape(3, 2, 1, 1)).await;

    let ids: HashSet<SpanId> = spans.iter().map(|s| s.span_context.span_id()).collect();
    let trace_ids: HashSet<_> = spans.iter().map(|s| s.span_context.trace_id()).collect();
    assert_eq!(trace_ids.len(), 1, "every span belongs to the same trace");

    for span in &spans {
        if span.parent_span_id == SpanId::INVALID {
            continue;
        }
        assert!(
            ids.contains(&span.parent_span_id),
            "span {:?} references a parent outside the tree",
            span.name
        );
        // The parent.id attribute mirrors the structural link.
        match attr(span, "parent.id") {
            Some(Value::String(id)) => assert_eq!(id.as_str(), span.parent_span_id.to_string()),
            other => panic!("missing parent.id attribute on {:?}: {other:?}", span.name),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_bounds_yield_exact_durations() {
    let spans = generate(&shape(2, 2, 10, 10)).await;
    for span in spans
        .iter()
        .filter(|s| s.parent_span_id != SpanId::INVALID)
    {
        let duration = span
            .end_time
            .duration_since(span.start_time)
            .expect("span ends after it starts");
        assert_eq!(duration, Duration::from_millis(10), "span {:?}", span.name);
    }
}

#[tokio::test(start_paused = true)]
async fn durations_stay_inside_configured_bounds() {
    let spans = generate(&shape(2, 3, 5, 20)).await;
    for span in spans
        .iter()
        .filter(|s| s.parent_span_id != SpanId::INVALID)
    {
        let duration = span
            .end_time
            .duration_since(span.start_time)
            .expect("span ends after it starts");
        assert!(
            (Duration::from_millis(5)..=Duration::from_millis(20)).contains(&duration),
            "span {:?} ran {duration:?}",
            span.name
        );
    }
}

#[tokio::test(start_paused = true)]
async fn names_and_attributes_follow_the_scheme() {
    let spans = generate(&shape(1, 2, 1, 1)).await;

    let root = spans
        .iter()
        .find(|s| s.parent_span_id == SpanId::INVALID)
        .expect("one root span");
    assert!(root.name.starts_with("parent - "), "root {:?}", root.name);
    assert!(attr(root, "spammer.id").is_some());
    assert!(attr(root, "timestamp").is_some());

    let mut indices = Vec::new();
    for child in spans.iter().filter(|s| s.parent_span_id != SpanId::INVALID) {
        assert!(child.name.starts_with("child 1 ("), "child {:?}", child.name);
        assert!(attr(child, "timestamp").is_some());
        match attr(child, "child.index") {
            Some(Value::I64(index)) => indices.push(*index),
            other => panic!("missing child.index on {:?}: {other:?}", child.name),
        }
    }
    indices.sort_unstable();
    assert_eq!(indices, vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_stops_generation_immediately() {
    let (exporter, provider) = test_provider();
    let tracer = provider.tracer("test");

    let cancel = CancellationToken::new();
    cancel.cancel();
    emit_trace(&tracer, &shape(5, 5, 50, 50), &cancel).await;

    let spans = exporter.get_finished_spans().expect("in-memory exporter");
    assert!(
        spans.len() <= 1,
        "cancelled build still produced {} spans",
        spans.len()
    );
}
