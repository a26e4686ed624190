// Request-scoped context propagated through every blocking call.
//
//! There is no single event loop here — every blocking call accepts this
//! context and must abort promptly on cancellation. One small struct
//! threaded through handlers, the workflow engine, and the dashboard
//! session loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Request- or task-scoped values carried alongside a cancellation token.
///
/// Cloning a `RequestContext` is cheap: the cancellation token is reference
/// counted internally, so cancelling one clone cancels every derived
/// `child()`.
#[derive(Clone, Debug)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    trace_id: Uuid,
    user_id: Option<Uuid>,
    session_token: Option<String>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// A fresh top-level context with a new trace id and no deadline.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                trace_id: Uuid::new_v4(),
                user_id: None,
                session_token: None,
                deadline: None,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        let mut inner = (*self.inner).clone_parts();
        inner.user_id = Some(user_id);
        self.inner = Arc::new(inner);
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        let mut inner = (*self.inner).clone_parts();
        inner.session_token = Some(token.into());
        self.inner = Arc::new(inner);
        self
    }

    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        let mut inner = (*self.inner).clone_parts();
        inner.deadline = Some(Instant::now() + timeout);
        self.inner = Arc::new(inner);
        self
    }

    pub fn trace_id(&self) -> Uuid {
        self.inner.trace_id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.inner.user_id
    }

    pub fn session_token(&self) -> Option<&str> {
        self.inner.session_token.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// A context derived from this one: shares the cancellation signal (so
    /// cancelling the parent cancels the child) but gets its own trace id and
    /// deadline, for per-step-execution timeouts.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                trace_id: Uuid::new_v4(),
                user_id: self.inner.user_id,
                session_token: self.inner.session_token.clone(),
                deadline: self.inner.deadline,
                cancel: self.inner.cancel.child_token(),
            }),
        }
    }

    /// Race `fut` against cancellation and the deadline (if any). Every
    /// suspension point in the engine/pipeline/dashboard goes through this so
    /// cancellation is honored uniformly instead of being checked ad hoc.
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        let cancel = self.inner.cancel.clone();
        match self.inner.deadline {
            Some(deadline) => tokio::select! {
                _ = cancel.cancelled() => None,
                _ = tokio::time::sleep_until(deadline) => None,
                out = fut => Some(out),
            },
            None => tokio::select! {
                _ = cancel.cancelled() => None,
                out = fut => Some(out),
            },
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn clone_parts(&self) -> Inner {
        Inner {
            trace_id: self.trace_id,
            user_id: self.user_id,
            session_token: self.session_token.clone(),
            deadline: self.deadline,
            cancel: self.cancel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_not_cancelled_and_has_no_deadline() {
        let ctx = RequestContext::new();
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_none());
        assert!(ctx.user_id().is_none());
    }

    #[test]
    fn with_user_preserves_trace_id_and_sets_user() {
        let ctx = RequestContext::new();
        let trace_id = ctx.trace_id();
        let user_id = Uuid::new_v4();
        let ctx = ctx.with_user(user_id);
        assert_eq!(ctx.trace_id(), trace_id);
        assert_eq!(ctx.user_id(), Some(user_id));
    }

    #[test]
    fn child_shares_cancellation_with_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        assert_ne!(parent.trace_id(), child.trace_id());
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn run_returns_none_once_cancelled() {
        let ctx = RequestContext::new();
        ctx.cancel();
        let outcome = ctx.run(async { 1 }).await;
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn run_returns_value_when_not_cancelled() {
        let ctx = RequestContext::new();
        let outcome = ctx.run(async { 7 }).await;
        assert_eq!(outcome, Some(7));
    }

    #[tokio::test]
    async fn run_times_out_past_deadline() {
        let ctx = RequestContext::new().with_deadline(Duration::from_millis(10));
        let outcome = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                1
            })
            .await;
        assert_eq!(outcome, None);
    }
}
