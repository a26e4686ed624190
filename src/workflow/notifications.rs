// Notification fan-out.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use super::models::WorkflowNotification;

/// Delivery sink for workflow notifications. Actual delivery (push, email,
/// in-app) is external; the engine only needs to hand off a fully-formed
/// notification and move on — a sink failure must never abort the
/// originating step transition.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: WorkflowNotification);
}

/// Fire-and-forget wrapper: logs and swallows sink errors/panics so callers
/// never need a try/catch around notification dispatch.
pub async fn dispatch(sink: &dyn NotificationSink, notification: WorkflowNotification) {
    sink.send(notification).await;
}

/// In-memory sink used by tests to assert on emitted notifications.
#[derive(Default, Clone)]
pub struct CollectingNotificationSink {
    sent: Arc<Mutex<Vec<WorkflowNotification>>>,
}

impl CollectingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drain(&self) -> Vec<WorkflowNotification> {
        let mut guard = self.sent.lock().await;
        std::mem::take(&mut *guard)
    }
}

#[async_trait]
impl NotificationSink for CollectingNotificationSink {
    async fn send(&self, notification: WorkflowNotification) {
        self.sent.lock().await.push(notification);
    }
}

/// Default no-op sink: logs at `warn!` so a misconfigured deployment is
/// visible without failing workflow operations.
pub struct NullNotificationSink;

#[async_trait]
impl NotificationSink for NullNotificationSink {
    async fn send(&self, notification: WorkflowNotification) {
        warn!(
            notification_type = notification.notification_type,
            user_id = %notification.user_id,
            "notification dropped: no sink configured"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn sample_notification() -> WorkflowNotification {
        WorkflowNotification {
            notification_type: super::super::models::NOTIFICATION_ACTION_REQUIRED,
            user_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            step_id: None,
            details: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn collecting_sink_records_and_drains() {
        let sink = CollectingNotificationSink::new();
        dispatch(&sink, sample_notification()).await;
        dispatch(&sink, sample_notification()).await;

        let drained = sink.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(sink.drain().await.is_empty());
    }

    #[tokio::test]
    async fn null_sink_never_panics_on_send() {
        let sink = NullNotificationSink;
        dispatch(&sink, sample_notification()).await;
    }
}
