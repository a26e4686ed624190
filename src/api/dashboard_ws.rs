// Dashboard WebSocket upgrade — `GET /ws?token=<jwt>`.
//
//! The token arrives as a query parameter rather than an `Authorization`
//! header, so this bypasses `auth_middleware` entirely and decodes claims
//! directly before handing the socket off to the full session loop.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::dashboard::run_session;
use crate::error::Result;
use crate::pipeline::auth::decode_claims;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

pub async fn dashboard_ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let claims = decode_claims(&query.token, &state.jwt_secret)?;
    let redis = state.redis.clone();
    let metrics_source = state.metrics_source.clone();
    let config = state.dashboard_session_config.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        run_session(socket, claims.user_id, redis, metrics_source, config).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_query_extracts_token_field() {
        let query: WsAuthQuery = serde_json::from_str(r#"{"token": "abc.def.ghi"}"#).unwrap();
        assert_eq!(query.token, "abc.def.ghi");
    }

    #[test]
    fn auth_query_rejects_missing_token() {
        let result: std::result::Result<WsAuthQuery, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }
}
