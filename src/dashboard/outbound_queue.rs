// Bounded outbound queue with drop-oldest-on-overflow semantics.
//
//! On overflow, drops the oldest queued partial updates (never the newest)
//! and logs a warning. A plain bounded `tokio::mpsc` backpressures the
//! *sender* instead, so we roll a small queue + `Notify` pair.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::messages::ServerMessage;

#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Mutex<VecDeque<ServerMessage>>>,
    notify: Arc<Notify>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            notify: Arc::new(Notify::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, message: ServerMessage) {
        let mut queue = self.inner.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            warn!(capacity = self.capacity, "outbound queue overflow, dropped oldest update");
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    /// Waits for and pops the next message, or `None` if `closed` fires
    /// first. Drains whatever is already queued before honoring
    /// cancellation, so a close signal never discards an unread update.
    pub async fn pop(&self, closed: &CancellationToken) -> Option<ServerMessage> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = closed.cancelled() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_drops_oldest_not_newest() {
        let queue = OutboundQueue::new(2);
        queue.push(ServerMessage::Pong).await;
        queue.push(ServerMessage::Pong).await;
        queue
            .push(ServerMessage::FreshMetrics {
                data: serde_json::json!({"marker": "newest"}),
            })
            .await;

        let closed = CancellationToken::new();
        let first = queue.pop(&closed).await.unwrap();
        let second = queue.pop(&closed).await.unwrap();
        assert!(matches!(first, ServerMessage::Pong));
        match second {
            ServerMessage::FreshMetrics { data } => {
                assert_eq!(data["marker"], "newest");
            }
            other => panic!("expected FreshMetrics, got {other:?}"),
        }
    }
}
