// Health and readiness probes. Unauthenticated, bypass the request pipeline.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::Result;

use super::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Checks the one dependency every request path touches: Redis. Postgres
/// reachability is exercised indirectly by every workflow read, so a
/// dedicated probe here would just duplicate that traffic.
pub async fn health_ready(State(state): State<AppState>) -> Result<Json<Value>> {
    state.redis.ping().await?;
    Ok(Json(json!({ "status": "ready" })))
}

/// Ungated Prometheus scrape target. Bypasses the request pipeline entirely,
/// same as `/health`.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}
