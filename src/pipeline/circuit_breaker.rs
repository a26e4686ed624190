// Circuit breaker — per-group, in-process.
//
//! One breaker state per logical route group, sharded with a
//! `DashMap<String, Arc<Mutex<_>>>` keyed by group. A single `Mutex` covers
//! both reads and state transitions, since the in-process counters are cheap
//! enough that a reader/writer lock buys nothing extra.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_requests: u32,
}

struct GroupState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_error_at: Option<Instant>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_error_at: None,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    groups: DashMap<String, Arc<Mutex<GroupState>>>,
    half_open_inflight: DashMap<String, Arc<AtomicU32>>,
}

/// A permit admitting one request through an open-guarded group; dropping it
/// (or calling `record_failure`/`record_success`) releases the half-open
/// concurrency slot it may hold.
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    group: String,
    was_half_open: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            groups: DashMap::new(),
            half_open_inflight: DashMap::new(),
        }
    }

    fn group_state(&self, group: &str) -> Arc<Mutex<GroupState>> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(GroupState::new())))
            .clone()
    }

    /// Checks (and, if the open timeout has elapsed, advances) breaker state
    /// for `group`. Returns an [`Admission`] when the request may proceed, or
    /// a `CoreError::Unavailable` when it must be rejected without touching
    /// the handler.
    pub async fn admit(&self, group: &str) -> std::result::Result<Admission<'_>, CoreError> {
        let state = self.group_state(group);
        let mut guard = state.lock().await;

        match guard.state {
            CircuitState::Closed => Ok(Admission {
                breaker: self,
                group: group.to_string(),
                was_half_open: false,
            }),
            CircuitState::Open => {
                let elapsed = guard
                    .last_error_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.open_timeout {
                    guard.state = CircuitState::HalfOpen;
                    guard.failures = 0;
                    guard.successes = 0;
                    drop(guard);
                    self.admit_half_open(group).await
                } else {
                    Err(CoreError::Unavailable("circuit open".into()))
                }
            }
            CircuitState::HalfOpen => {
                drop(guard);
                self.admit_half_open(group).await
            }
        }
    }

    async fn admit_half_open(&self, group: &str) -> std::result::Result<Admission<'_>, CoreError> {
        let inflight = self
            .half_open_inflight
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone();
        let current = inflight.fetch_add(1, Ordering::SeqCst);
        if current >= self.config.half_open_max_requests {
            inflight.fetch_sub(1, Ordering::SeqCst);
            return Err(CoreError::Unavailable("circuit half-open probe limit reached".into()));
        }
        Ok(Admission {
            breaker: self,
            group: group.to_string(),
            was_half_open: true,
        })
    }

    async fn record(&self, group: &str, success: bool) {
        let state = self.group_state(group);
        let mut guard = state.lock().await;
        match guard.state {
            CircuitState::Closed => {
                if success {
                    guard.failures = 0;
                } else {
                    guard.failures += 1;
                    if guard.failures >= self.config.failure_threshold {
                        guard.state = CircuitState::Open;
                        guard.last_error_at = Some(Instant::now());
                        warn!(group, "circuit breaker opened");
                    }
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    guard.successes += 1;
                    if guard.successes >= self.config.success_threshold {
                        guard.state = CircuitState::Closed;
                        guard.failures = 0;
                        guard.successes = 0;
                    }
                } else {
                    guard.state = CircuitState::Open;
                    guard.last_error_at = Some(Instant::now());
                    guard.failures = 0;
                    guard.successes = 0;
                    warn!(group, "circuit breaker reopened from half-open");
                }
            }
            CircuitState::Open => {}
        }
    }
}

impl Admission<'_> {
    pub async fn record_success(self) {
        self.breaker.record(&self.group, true).await;
        self.release_half_open();
    }

    pub async fn record_failure(self) {
        self.breaker.record(&self.group, false).await;
        self.release_half_open();
    }

    fn release_half_open(&self) {
        if self.was_half_open {
            if let Some(inflight) = self.breaker.half_open_inflight.get(&self.group) {
                inflight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// Route group derived from the request path with entity ids collapsed, so
/// e.g. every `/executions/:id/cancel` call shares one breaker regardless of
/// which execution it names — a literal per-path key would mint a fresh,
/// always-closed breaker per entity and never actually trip (the same
/// uuid-collapsing label `metrics::route_label` uses for the same reason).
fn group_for_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn circuit_breaker_middleware(
    State(breaker): State<Arc<CircuitBreaker>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let group = group_for_path(request.uri().path());
    let admission = match breaker.admit(&group).await {
        Ok(admission) => admission,
        Err(err) => return err.into_response(),
    };

    let response = next.run(request).await;
    if response.status().as_u16() >= 500 {
        admission.record_failure().await;
    } else {
        admission.record_success().await;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_millis(20),
            half_open_max_requests: 2,
        }
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.admit("g").await.unwrap().record_failure().await;
        }
        assert!(breaker.admit("g").await.is_err());
    }

    #[test]
    fn group_for_path_collapses_entity_ids() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            group_for_path(&format!("/executions/{id}/cancel")),
            "executions/:id/cancel"
        );
    }

    #[tokio::test]
    async fn half_opens_after_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.admit("g").await.unwrap().record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        for _ in 0..2 {
            breaker.admit("g").await.unwrap().record_success().await;
        }
        assert!(breaker.admit("g").await.is_ok());
    }
}
