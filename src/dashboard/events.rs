// Dashboard event model and publisher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::substrate::redis_client::RedisClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardEvent {
    pub event_type: String,
    pub user_id: Uuid,
    pub entity_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub details: HashMap<String, Value>,
}

impl DashboardEvent {
    pub fn new(event_type: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            event_type: event_type.into(),
            user_id,
            entity_id: None,
            timestamp: Utc::now(),
            details: HashMap::new(),
        }
    }

    pub fn with_entity(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The `details.action` field the dashboard forwarder inspects to decide
    /// between a full refresh and a named partial.
    pub fn action(&self) -> Option<&str> {
        self.details.get("action").and_then(|v| v.as_str())
    }

    pub fn channel_for(user_id: Uuid) -> String {
        format!("dashboard:events:{user_id}")
    }

    pub const BROADCAST_CHANNEL: &'static str = "dashboard:events:broadcast";
}

/// Thin publisher wrapper every domain operation calls after mutating
/// state. Fire-and-forget: publish failures are logged, never propagated —
/// a publish failure must not abort the originating operation.
#[async_trait]
pub trait DashboardPublisher: Send + Sync {
    async fn publish(&self, event: DashboardEvent);

    async fn publish_broadcast(&self, event: DashboardEvent) {
        self.publish(event).await;
    }
}

#[derive(Clone)]
pub struct RedisDashboardPublisher {
    redis: RedisClient,
}

impl RedisDashboardPublisher {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl DashboardPublisher for RedisDashboardPublisher {
    async fn publish(&self, event: DashboardEvent) {
        let channel = DashboardEvent::channel_for(event.user_id);
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(err) = self.redis.publish(&channel, &payload).await {
                    warn!(%err, %channel, "failed to publish dashboard event");
                }
            }
            Err(err) => warn!(%err, "failed to serialize dashboard event"),
        }
    }

    async fn publish_broadcast(&self, event: DashboardEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(err) = self
                    .redis
                    .publish(DashboardEvent::BROADCAST_CHANNEL, &payload)
                    .await
                {
                    warn!(%err, "failed to publish broadcast dashboard event");
                }
            }
            Err(err) => warn!(%err, "failed to serialize broadcast dashboard event"),
        }
    }
}

/// In-memory collecting publisher for tests.
#[derive(Default, Clone)]
pub struct CollectingDashboardPublisher {
    events: Arc<Mutex<Vec<DashboardEvent>>>,
}

impl CollectingDashboardPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<DashboardEvent> {
        let mut guard = self.events.lock().await;
        std::mem::take(&mut *guard)
    }
}

#[async_trait]
impl DashboardPublisher for CollectingDashboardPublisher {
    async fn publish(&self, event: DashboardEvent) {
        self.events.lock().await.push(event);
    }
}
