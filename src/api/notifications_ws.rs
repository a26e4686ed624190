// Notifications-only WebSocket — `GET /api/notifications/ws?token=<jwt>`.
//
//! A lighter relay than the full dashboard session: no metrics frames, no
//! coalescing, just `workflow_*`-prefixed events forwarded as they arrive.
//! Uses the same bus subscription `dashboard::session::run_session` does,
//! minus the writer/heartbeat/forwarder split that full dashboard frames
//! need.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::dashboard::bus::subscribe_user_channel;
use crate::error::Result;
use crate::pipeline::auth::decode_claims;
use crate::substrate::redis_client::RedisClient;

use super::dashboard_ws::WsAuthQuery;
use super::AppState;

pub async fn notifications_ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let claims = decode_claims(&query.token, &state.jwt_secret)?;
    let redis = state.redis.clone();
    Ok(ws.on_upgrade(move |socket| run_notifications_session(socket, claims.user_id, redis)))
}

async fn run_notifications_session(socket: WebSocket, user_id: Uuid, redis: RedisClient) {
    let (mut sender, mut receiver) = socket.split();
    let mut bus_rx = match subscribe_user_channel(redis, user_id).await {
        Ok(rx) => rx,
        Err(err) => {
            warn!(%err, %user_id, "notifications ws: bus subscription failed");
            return;
        }
    };

    loop {
        tokio::select! {
            event = bus_rx.recv() => {
                let Some(event) = event else { break };
                if !event.event_type.starts_with("workflow_") {
                    continue;
                }
                let payload = json!({ "type": "notification", "data": event }).to_string();
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
