// Request metrics — every request observed regardless of route, independent
// of the dashboard's own `MetricsSource` feed.
//
//! Emits through the `metrics` facade (`metrics::counter!`/
//! `metrics::histogram!` call sites rather than a hand-rolled registry), so
//! whichever exporter `bin/server.rs` installs (`metrics-exporter-prometheus`)
//! picks these up for free.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use std::sync::Arc;
use std::time::Instant;

/// Placeholder state type so the middleware can be wired with
/// `from_fn_with_state` alongside the other pipeline stages even though it
/// has no fields of its own today — keeps the call site uniform if a given
/// deployment ever wants per-route overrides.
#[derive(Default, Clone)]
pub struct MetricsState;

const SIZE_BUCKETS: [f64; 8] = [
    100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0, 100_000_000.0, 1_000_000_000.0,
];

pub async fn metrics_middleware(
    State(_state): State<Arc<MetricsState>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let method = request.method().to_string();
    let path = route_label(&request);
    let request_size = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();

    let status = response.status().as_u16().to_string();
    let response_size = response
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    metrics::counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.clone(),
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.clone(),
        "path" => path.clone(),
    )
    .record(elapsed.as_secs_f64());

    record_size_bucket("http_request_size_bytes", &method, &path, request_size);
    record_size_bucket("http_response_size_bytes", &method, &path, response_size);

    response
}

/// Routes carrying a trailing uuid collapse to a single label so the
/// per-resource cardinality doesn't fan out one series per entity.
fn route_label(request: &Request<Body>) -> String {
    request
        .uri()
        .path()
        .split('/')
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Exponential, base-10 bucket ladder for size histograms, starting at 100
/// bytes across 8 buckets; recording into the bucket label the size falls
/// under rather than a raw value keeps cardinality bounded without needing a
/// custom exporter-side bucket config.
fn record_size_bucket(metric: &'static str, method: &str, path: &str, size: u64) {
    let bucket = SIZE_BUCKETS
        .iter()
        .find(|&&b| (size as f64) <= b)
        .copied()
        .unwrap_or(*SIZE_BUCKETS.last().unwrap());

    metrics::histogram!(
        metric,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "bucket" => bucket.to_string(),
    )
    .record(size as f64);
}
