use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use rand::Rng;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::config::TracingConfig;

/// Emit one complete trace tree: a root span plus `trace_depth` levels of
/// `children_per_node` children each.
///
/// Each span is released to the exporter as it closes; nothing is retained
/// once the tree has been walked. Every simulated-duration wait observes
/// `cancel`, and a cancelled tree stops creating spans immediately.
pub async fn emit_trace<T>(tracer: &T, config: &TracingConfig, cancel: &CancellationToken)
where
    T: Tracer + Sync,
    T::Span: Send + Sync + 'static,
{
    let root_name = format!("parent - {}", wall_clock_label());
    let started = SystemTime::now();
    let root = tracer
        .span_builder(root_name.clone())
        .with_kind(SpanKind::Internal)
        .with_start_time(started)
        .with_attributes([
            KeyValue::new("spammer.id", spammer_id()),
            KeyValue::new("timestamp", unix_nanos(started)),
        ])
        .start_with_context(tracer, &Context::new());
    let root_cx = Context::new().with_span(root);

    build_children(
        tracer,
        root_cx.clone(),
        root_name,
        config.trace_depth,
        config.children_per_node,
        config.min_child_duration_ms,
        config.max_child_duration_ms,
        cancel,
    )
    .await;

    root_cx.span().end();
}

/// Recursively create `children_per_node` child spans under `parent_cx`,
/// then descend until `remaining_depth` runs out.
///
/// Each child draws its simulated duration uniformly from
/// `[min_ms, max_ms]` inclusive and closes exactly that long after it
/// started. Recursion depth is bounded by the validated `trace_depth`, so
/// total node count per root is `children_per_node^depth` summed per level;
/// pathological shapes are an accepted (expensive) configuration, not an
/// error.
#[allow(clippy::too_many_arguments)]
fn build_children<'a, T>(
    tracer: &'a T,
    parent_cx: Context,
    parent_name: String,
    remaining_depth: u32,
    children_per_node: u32,
    min_ms: u64,
    max_ms: u64,
    cancel: &'a CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>
where
    T: Tracer + Sync,
    T::Span: Send + Sync + 'static,
{
    Box::pin(async move {
        if remaining_depth == 0 {
            return;
        }
        let parent_id = parent_cx.span().span_context().span_id().to_string();

        for index in 0..children_per_node {
            if cancel.is_cancelled() {
                return;
            }

            let duration = Duration::from_millis(draw_duration_ms(min_ms, max_ms));
            let name = child_name(&parent_name, remaining_depth, index);
            let started = SystemTime::now();
            let child = tracer
                .span_builder(name.clone())
                .with_kind(SpanKind::Internal)
                .with_start_time(started)
                .with_attributes([
                    KeyValue::new("parent.id", parent_id.clone()),
                    KeyValue::new("child.index", i64::from(index)),
                    KeyValue::new("timestamp", unix_nanos(started)),
                ])
                .start_with_context(tracer, &parent_cx);
            let child_cx = parent_cx.with_span(child);

            // Simulated work. The only await between a span opening and closing.
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(duration) => {}
            }

            child_cx.span().end_with_timestamp(started + duration);

            build_children(
                tracer,
                child_cx,
                name,
                remaining_depth - 1,
                children_per_node,
                min_ms,
                max_ms,
                cancel,
            )
            .await;
        }
    })
}

/// Derive a child name from its parent's: the leading segment is replaced
/// with the depth level and sibling index, the timestamp tail is kept.
fn child_name(parent_name: &str, depth: u32, index: u32) -> String {
    let tail = parent_name
        .split_once(" - ")
        .map_or(parent_name, |(_, tail)| tail);
    format!("child {depth} ({index}) - {tail}")
}

fn draw_duration_ms(min_ms: u64, max_ms: u64) -> u64 {
    rand::thread_rng().gen_range(min_ms..=max_ms)
}

/// Random 8-byte identifier, hex-encoded.
fn spammer_id() -> String {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("failed to generate spammer id");
    hex::encode(bytes)
}

fn unix_nanos(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos() as i64
}

fn wall_clock_label() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
