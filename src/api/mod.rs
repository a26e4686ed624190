// HTTP/WebSocket surface — wires the request pipeline (pipeline::*) around
// the workflow engine and mounts the dashboard bus's WebSocket endpoints.

pub mod dashboard_ws;
pub mod health;
pub mod notifications_ws;
pub mod workflows;

use std::sync::Arc;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::Router;

use crate::dashboard::{DashboardSessionConfig, MetricsSource};
use crate::pipeline::auth::auth_middleware;
use crate::pipeline::cache::cache_middleware;
use crate::pipeline::circuit_breaker::circuit_breaker_middleware;
use crate::pipeline::metrics::metrics_middleware;
use crate::pipeline::org_scope::org_scope_middleware;
use crate::pipeline::rate_limit::rate_limit_middleware;
use crate::pipeline::PipelineState;
use crate::substrate::redis_client::RedisClient;
use crate::workflow::WorkflowEngine;

/// Everything a handler or middleware needs, cloned once per request. One
/// struct rather than five separate `Extension`/`State` layers.
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
    pub pipeline: PipelineState,
    pub redis: RedisClient,
    pub metrics_source: Arc<dyn MetricsSource>,
    pub dashboard_session_config: DashboardSessionConfig,
    pub jwt_secret: Arc<str>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Assembles the full router: unauthenticated health probes, token-
/// authenticated WebSocket upgrades, and the `/api/workflows` surface behind
/// the full middleware chain in declared order (auth → org-scope →
/// rate-limit → metrics → cache-read → circuit-state → handler). axum
/// composes `.layer()` calls outermost-last, so that order is built here
/// innermost-first: circuit breaker closest to the handler, auth furthest
/// out.
pub fn build_router(state: AppState) -> Router {
    let workflows = workflows::router()
        .layer(from_fn_with_state(
            state.pipeline.circuit_breaker.clone(),
            circuit_breaker_middleware,
        ))
        .layer(from_fn_with_state(state.pipeline.cache.clone(), cache_middleware))
        .layer(from_fn(workflows::tag_cache_invalidation))
        .layer(from_fn_with_state(state.pipeline.metrics.clone(), metrics_middleware))
        .layer(from_fn_with_state(
            state.pipeline.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(from_fn(org_scope_middleware))
        .layer(from_fn_with_state(state.pipeline.auth.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::health_ready))
        .route("/metrics", get(health::metrics))
        .route("/ws", get(dashboard_ws::dashboard_ws_handler))
        .route(
            "/api/notifications/ws",
            get(notifications_ws::notifications_ws_handler),
        )
        .nest("/api/workflows", workflows)
        .with_state(state)
}
