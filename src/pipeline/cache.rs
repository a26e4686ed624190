// Response cache.
//
//! GET-only cache keyed by resource shape, not raw URL, so query strings and
//! per-user scoping factor in deliberately rather than by accident. A
//! response recorder captures the handler's body so a cache-miss write can
//! happen without re-invoking the handler.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::substrate::redis_client::RedisClient;

#[derive(Clone)]
pub struct ResponseCache {
    redis: RedisClient,
    prefix: String,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(redis: RedisClient, prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            default_ttl,
        }
    }

    /// Key composition: `prefix : resource_type : (list | id:<uuid>) :
    /// query? : user?`. `path` is the request's full, pre-nesting path
    /// (e.g. `/api/workflows/<id>`) — resource type is its *second* segment,
    /// not the first one routers strip.
    pub fn key(&self, path: &str, query: Option<&str>, user_id: Option<Uuid>) -> String {
        compose_cache_key(&self.prefix, path, query, user_id)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.redis.get(key).await
    }

    pub async fn store(&self, key: &str, body: &str, ttl: Option<Duration>) -> Result<()> {
        self.redis
            .set_ex(key, body, ttl.unwrap_or(self.default_ttl))
            .await
    }

    /// Deletes every key matching `<prefix>:<pattern>` for each pattern,
    /// trailing `*` supported.
    pub async fn invalidate(&self, patterns: &[String]) -> Result<u64> {
        let mut total = 0;
        for pattern in patterns {
            total += self
                .redis
                .del_pattern(&format!("{}:{}", self.prefix, pattern))
                .await?;
        }
        Ok(total)
    }
}

fn compose_cache_key(prefix: &str, path: &str, query: Option<&str>, user_id: Option<Uuid>) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let resource_type = segments.get(1).copied().unwrap_or("root");
    let selector = segments
        .get(2)
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(|id| format!("id:{id}"))
        .unwrap_or_else(|| "list".to_string());

    let mut key = format!("{prefix}:{resource_type}:{selector}");
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        key.push(':');
        key.push_str(query);
    }
    if let Some(user_id) = user_id {
        key.push(':');
        key.push_str(&user_id.to_string());
    }
    key
}

/// Declares which invalidation patterns a route triggers on a 2xx response.
/// Attached per-route via axum `Extension`.
#[derive(Clone, Debug, Default)]
pub struct CacheInvalidate(pub Vec<String>);

/// GET-only cache-read/cache-write middleware. Non-GET requests, and routes
/// without a resolvable cache key, pass straight through.
pub async fn cache_middleware(
    State(cache): State<Arc<ResponseCache>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response> {
    if request.method() != axum::http::Method::GET {
        return Ok(run_with_invalidation(cache, request, next).await?);
    }

    // Routes are mounted under a nested router (`/api/workflows/...`), which
    // strips the matched prefix from `request.uri()` before this layer sees
    // it; `OriginalUri` (inserted by `Router::nest`) carries the full path
    // the "second path segment" rule above assumes.
    let full_path = request
        .extensions()
        .get::<axum::extract::OriginalUri>()
        .map(|o| o.0.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let query = request.uri().query().map(|q| q.to_string());
    let user_id = request
        .extensions()
        .get::<crate::pipeline::auth::Claims>()
        .map(|c| c.user_id);
    let key = cache.key(&full_path, query.as_deref(), user_id);

    if let Some(body) = cache.get(&key).await? {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("static cache response is well-formed"));
    }

    let response = next.run(request).await;
    let (parts, body) = response.into_parts();
    let status = parts.status;
    let bytes = buffer_body(body).await?;

    if status == StatusCode::OK {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            cache.store(&key, text, None).await?;
        }
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

/// Runs the handler, then applies `CacheInvalidate` patterns (if the route
/// declared any via extension) when the response is 2xx.
async fn run_with_invalidation(
    cache: Arc<ResponseCache>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response> {
    let invalidate = request.extensions().get::<CacheInvalidate>().cloned();
    let response = next.run(request).await;
    if response.status().is_success() {
        if let Some(CacheInvalidate(patterns)) = invalidate {
            if !patterns.is_empty() {
                cache.invalidate(&patterns).await?;
            }
        }
    }
    Ok(response)
}

async fn buffer_body(body: Body) -> Result<Bytes> {
    hyper::body::to_bytes(body)
        .await
        .map_err(crate::error::CoreError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_composition_orders_segments_and_scopes_by_user() {
        let user = Uuid::new_v4();
        let key = compose_cache_key("cache", "/api/tasks/list", Some("page=2"), Some(user));
        assert_eq!(key, format!("cache:tasks:list:page=2:{user}"));
    }

    #[test]
    fn key_composition_recognizes_uuid_selector() {
        let id = Uuid::new_v4();
        let key = compose_cache_key("cache", &format!("/api/tasks/{id}"), None, None);
        assert_eq!(key, format!("cache:tasks:id:{id}"));
    }

    #[test]
    fn key_composition_falls_back_to_list_for_non_uuid_segment() {
        let key = compose_cache_key("cache", "/api/tasks/active", None, None);
        assert_eq!(key, "cache:tasks:list");
    }
}
