// Rate limiting.
//
//! Sliding-window counter backed by Redis (`INCR` + `EXPIRE`), authoritative
//! across replicas since the counter state lives in Redis rather than
//! per-process memory. Key = `client_ip + ":" + request_path`.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::substrate::redis_client::RedisClient;

#[derive(Clone)]
pub struct RateLimiter {
    redis: RedisClient,
    max_attempts: u32,
    window: Duration,
}

pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: i64,
}

impl RateLimiter {
    pub fn new(redis: RedisClient, max_attempts: u32, window: Duration) -> Self {
        Self {
            redis,
            max_attempts,
            window,
        }
    }

    fn key(client_ip: &str, path: &str) -> String {
        format!("ratelimit:{client_ip}:{path}")
    }

    /// `Allow(key) -> (allowed, remaining, reset_at, err)` folded into one
    /// `Result<Decision>` — the `err` arm is this function's `Err`.
    pub async fn allow(&self, client_ip: &str, path: &str) -> Result<Decision> {
        let key = Self::key(client_ip, path);
        let count = self.redis.incr_with_expiry(&key, self.window).await?;
        let ttl = self.redis.ttl(&key).await?;
        let reset_at = chrono::Utc::now().timestamp() + ttl.max(0);
        let remaining = (self.max_attempts as i64 - count).max(0) as u32;
        Ok(Decision {
            allowed: count <= self.max_attempts as i64,
            remaining,
            reset_at,
        })
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response> {
    let client_ip = client_ip(&request, addr);
    let path = request.uri().path().to_string();

    let decision = limiter.allow(&client_ip, &path).await?;

    if !decision.allowed {
        let reset_in = (decision.reset_at - chrono::Utc::now().timestamp()).max(0) as u64;
        let mut response = CoreError::RateLimited { reset_in }.into_response();
        apply_rate_limit_headers(&mut response, &decision);
        return Ok(response);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(&mut response, &decision);
    Ok(response)
}

fn apply_rate_limit_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from_str(&decision.remaining.to_string()).unwrap(),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from_str(&decision.reset_at.to_string()).unwrap(),
    );
}

/// Prefers `X-Forwarded-For`'s first hop, falling back to the socket peer
/// address.
fn client_ip(request: &Request<Body>, peer: SocketAddr) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_scoped_to_ip_and_path() {
        assert_eq!(
            RateLimiter::key("1.2.3.4", "/api/users/login"),
            "ratelimit:1.2.3.4:/api/users/login"
        );
    }
}
