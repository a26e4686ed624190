// Bounded worker pool for asynchronous step execution.
//
//! An explicit task-submission interface rather than bare `tokio::spawn`
//! calls scattered through handlers: a `tokio::sync::Semaphore` bounds
//! concurrency and every submitted task carries its own timeout, so a hung
//! step body can't starve the pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    default_timeout: Duration,
}

impl TaskPool {
    pub fn new(size: usize, default_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
            default_timeout,
        }
    }

    /// Runs `task` on the pool once a permit is free, bounded by `timeout`
    /// (or the pool's default). Returns `None` if the task timed out; the
    /// task itself is not forcibly cancelled mid-body — there is no mid-body
    /// interruption, the task is simply detached and its result discarded.
    pub async fn spawn<F, T>(&self, timeout: Option<Duration>, task: F) -> Option<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("task pool semaphore closed, dropping task");
                return None;
            }
        };
        let timeout = timeout.unwrap_or(self.default_timeout);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            task.await
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "task pool worker panicked");
                None
            }
            Err(_) => {
                warn!(?timeout, "task pool worker timed out");
                None
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_respects_timeout() {
        let pool = TaskPool::new(2, Duration::from_millis(50));
        let result = pool
            .spawn(Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                42
            })
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn spawn_returns_value_within_timeout() {
        let pool = TaskPool::new(2, Duration::from_millis(50));
        let result = pool.spawn(None, async { 7 }).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn spawn_bounds_concurrency() {
        let pool = TaskPool::new(1, Duration::from_secs(1));
        assert_eq!(pool.available_permits(), 1);
        let pool2 = pool.clone();
        let handle = tokio::spawn(async move {
            pool2
                .spawn(None, async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.available_permits(), 0);
        handle.await.unwrap();
        assert_eq!(pool.available_permits(), 1);
    }
}
