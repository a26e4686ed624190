// Redis pub/sub transport.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use crate::substrate::redis_client::RedisClient;

use super::events::DashboardEvent;

/// Subscribes to a user's dashboard channel and the broadcast channel,
/// forwarding decoded events onto an mpsc channel until the subscription is
/// dropped or the connection fails. Runs on its own Redis connection — one
/// connection per subscriber is cheap and isolates slow consumers from each
/// other.
pub async fn subscribe_user_channel(
    redis: RedisClient,
    user_id: uuid::Uuid,
) -> crate::error::Result<mpsc::Receiver<DashboardEvent>> {
    let mut pubsub = redis.subscriber().await?;
    let user_channel = DashboardEvent::channel_for(user_id);
    pubsub
        .subscribe(&user_channel)
        .await
        .map_err(crate::error::CoreError::internal)?;
    pubsub
        .subscribe(DashboardEvent::BROADCAST_CHANNEL)
        .await
        .map_err(crate::error::CoreError::internal)?;

    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%err, "dashboard bus: malformed redis payload");
                    continue;
                }
            };
            match serde_json::from_str::<DashboardEvent>(&payload) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(%err, "dashboard bus: failed to decode event"),
            }
        }
    });

    Ok(rx)
}
