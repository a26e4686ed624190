// Request Pipeline — auth, rate limiting, response cache, circuit breaking,
// metrics, all as axum middleware layered around the workflow/notification
// handlers.

pub mod auth;
pub mod cache;
pub mod circuit_breaker;
pub mod metrics;
pub mod org_scope;
pub mod rate_limit;

pub use auth::{AuthConfig, AuthState, Claims, RedisSessionStore, SessionStore, TokenBlacklist};
pub use cache::{CacheInvalidate, ResponseCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use metrics::MetricsState;
pub use org_scope::OrganizationId;
pub use rate_limit::RateLimiter;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::substrate::redis_client::RedisClient;

/// Every layer of the request pipeline, built once at startup and shared
/// across the router via `Extension`/`State` as each middleware needs.
/// Grouping them here, rather than threading five separate `Arc`s through
/// `bin/server.rs`, keeps request handler setup to one clone per request
/// instead of five.
#[derive(Clone)]
pub struct PipelineState {
    pub auth: Arc<AuthState>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<MetricsState>,
}

impl PipelineState {
    pub fn new(config: &AppConfig, redis: RedisClient, sessions: Arc<dyn SessionStore>) -> Self {
        let auth = Arc::new(AuthState {
            config: AuthConfig {
                jwt_secret: config.jwt_secret.clone(),
                service_user_agents: config.service_user_agents.clone(),
            },
            sessions,
            blacklist: TokenBlacklist::new(redis.clone()),
        });

        let rate_limiter = Arc::new(RateLimiter::new(
            redis.clone(),
            config.rate_limit_max_attempts,
            config.rate_limit_window(),
        ));

        let cache = Arc::new(ResponseCache::new(
            redis,
            config.cache_key_prefix.clone(),
            config.cache_default_ttl(),
        ));

        let circuit_breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_failure_threshold,
            success_threshold: config.circuit_success_threshold,
            open_timeout: config.circuit_open_timeout(),
            half_open_max_requests: config.circuit_half_open_max_requests,
        }));

        Self {
            auth,
            rate_limiter,
            cache,
            circuit_breaker,
            metrics: Arc::new(MetricsState::default()),
        }
    }
}
