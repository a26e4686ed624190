// Per-WebSocket session loop.
//
//! Three cooperating activities share one outbound queue: a reader that
//! decodes client messages, a forwarder that turns Redis bus events into
//! coalesced outbound updates, and a heartbeat that pings on a fixed
//! interval and closes idle connections. None of them write to the
//! WebSocket directly — they all push onto `OutboundQueue`, which a single
//! writer task drains: one producer, serialized through a writer.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::substrate::redis_client::RedisClient;

use super::bus::subscribe_user_channel;
use super::coalesce::{narrow_frame, PendingUpdate};
use super::events::DashboardEvent;
use super::messages::{ClientMessage, ServerMessage};
use super::metrics_frame::MetricsSource;
use super::outbound_queue::OutboundQueue;

#[derive(Debug, Clone)]
pub struct DashboardSessionConfig {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub debounce_interval: Duration,
    pub outbound_capacity: usize,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drives one authenticated WebSocket end to end. Returns once the socket
/// closes or the heartbeat detects an idle connection.
pub async fn run_session(
    socket: WebSocket,
    user_id: Uuid,
    redis: RedisClient,
    metrics_source: Arc<dyn MetricsSource>,
    config: DashboardSessionConfig,
) {
    let (mut sender, mut receiver) = socket.split();
    let outbound = OutboundQueue::new(config.outbound_capacity);
    let closed = CancellationToken::new();
    let last_activity = Arc::new(Mutex::new(Instant::now()));
    let pending_ack = Arc::new(AtomicBool::new(false));

    match metrics_source.compute_frame(user_id, now_ms()).await {
        Ok(frame) => {
            outbound
                .push(ServerMessage::InitialMetrics {
                    data: json!(frame),
                })
                .await;
        }
        Err(err) => warn!(%err, %user_id, "failed to compute initial dashboard frame"),
    }

    let mut bus_rx = match subscribe_user_channel(redis.clone(), user_id).await {
        Ok(rx) => rx,
        Err(err) => {
            warn!(%err, %user_id, "dashboard bus subscription failed");
            return;
        }
    };

    let writer_closed = closed.clone();
    let writer_outbound = outbound.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = writer_outbound.pop(&writer_closed).await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "failed to serialize dashboard server message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        writer_closed.cancel();
    });

    let reader_outbound = outbound.clone();
    let reader_activity = last_activity.clone();
    let reader_pending_ack = pending_ack.clone();
    let reader_closed = closed.clone();
    let reader_metrics_source = metrics_source.clone();
    let reader = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = reader_closed.cancelled() => break,
                frame = receiver.next() => frame,
            };
            let Some(frame) = frame else { break };
            let message = match frame {
                Ok(message) => message,
                Err(_) => break,
            };
            match message {
                Message::Close(_) => break,
                Message::Text(text) => {
                    *reader_activity.lock().await = Instant::now();
                    handle_client_text(
                        &text,
                        user_id,
                        &reader_outbound,
                        &reader_pending_ack,
                        reader_metrics_source.as_ref(),
                    )
                    .await;
                }
                Message::Pong(_) | Message::Ping(_) => {
                    *reader_activity.lock().await = Instant::now();
                }
                Message::Binary(_) => {}
            }
        }
        reader_closed.cancel();
    });

    let forwarder_outbound = outbound.clone();
    let forwarder_metrics_source = metrics_source.clone();
    let forwarder_closed = closed.clone();
    let debounce_interval = config.debounce_interval;
    let forwarder = tokio::spawn(async move {
        let pending = Arc::new(Mutex::new(PendingUpdate::new()));
        let scheduled = Arc::new(AtomicBool::new(false));
        loop {
            let event: Option<DashboardEvent> = tokio::select! {
                _ = forwarder_closed.cancelled() => None,
                event = bus_rx.recv() => event,
            };
            let Some(event) = event else { break };

            pending.lock().await.record(&event);

            if !scheduled.swap(true, Ordering::SeqCst) {
                let pending = pending.clone();
                let scheduled = scheduled.clone();
                let outbound = forwarder_outbound.clone();
                let metrics_source = forwarder_metrics_source.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(debounce_interval).await;
                    let batch = {
                        let mut guard = pending.lock().await;
                        guard.take()
                    };
                    scheduled.store(false, Ordering::SeqCst);
                    if batch.is_empty() {
                        return;
                    }
                    match metrics_source.compute_frame(user_id, now_ms()).await {
                        Ok(frame) => {
                            let frame = narrow_frame(frame, &batch);
                            outbound
                                .push(ServerMessage::DashboardUpdate { data: json!(frame) })
                                .await;
                        }
                        Err(err) => warn!(%err, %user_id, "failed to recompute dashboard frame"),
                    }
                });
            }
        }
    });

    let heartbeat_outbound = outbound.clone();
    let heartbeat_activity = last_activity.clone();
    let heartbeat_closed = closed.clone();
    let heartbeat_interval = config.heartbeat_interval;
    let idle_timeout = config.idle_timeout;
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = heartbeat_closed.cancelled() => break,
                _ = ticker.tick() => {
                    let idle_for = heartbeat_activity.lock().await.elapsed();
                    if idle_for > idle_timeout {
                        debug!(%user_id, ?idle_for, "dashboard session idle timeout");
                        heartbeat_closed.cancel();
                        break;
                    }
                    heartbeat_outbound.push(ServerMessage::Ping).await;
                }
            }
        }
    });

    let _ = tokio::join!(writer, reader, forwarder, heartbeat);
}

async fn handle_client_text(
    text: &str,
    user_id: Uuid,
    outbound: &OutboundQueue,
    pending_ack: &AtomicBool,
    metrics_source: &dyn MetricsSource,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(%err, "dashboard session: malformed client message");
            return;
        }
    };
    match message {
        ClientMessage::Ping => outbound.push(ServerMessage::Pong).await,
        ClientMessage::Refresh => match metrics_source.compute_frame(user_id, now_ms()).await {
            Ok(frame) => {
                outbound
                    .push(ServerMessage::FreshMetrics { data: json!(frame) })
                    .await
            }
            Err(err) => warn!(%err, %user_id, "refresh failed"),
        },
        ClientMessage::RefreshFocus => {
            send_partition(outbound, user_id, "focus", true, metrics_source).await
        }
        ClientMessage::RefreshHeatmap => {
            send_partition(outbound, user_id, "habit_heatmap", false, metrics_source).await
        }
        ClientMessage::DashboardUpdateAck => {
            pending_ack.store(false, Ordering::SeqCst);
        }
    }
}

async fn send_partition(
    outbound: &OutboundQueue,
    user_id: Uuid,
    partition: &str,
    as_focus_data: bool,
    metrics_source: &dyn MetricsSource,
) {
    match metrics_source
        .compute_partition(user_id, partition, now_ms())
        .await
    {
        Ok(Some(value)) => {
            let data = json!({ partition: value });
            let message = if as_focus_data {
                ServerMessage::FocusData { data }
            } else {
                ServerMessage::MetricsUpdate { data }
            };
            outbound.push(message).await;
        }
        Ok(None) => warn!(%user_id, partition, "unknown dashboard partition requested"),
        Err(err) => warn!(%err, %user_id, partition, "partition refresh failed"),
    }
}
