// Authentication and authorization middleware.
//
//! Bearer token extraction, blacklist check, JWT decode, session validation,
//! and role/permission set-containment checks, all as axum middleware
//! (`State<Arc<T>>` extraction, a dedicated extractor type, a plain async fn
//! wired with `axum::middleware::from_fn_with_state`).

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::substrate::redis_client::RedisClient;

/// Decoded bearer-token claims. The token issuer (login, refresh, MFA) is
/// an external collaborator; this core only consumes already-issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub org_id: Option<Uuid>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub service_user_agents: Vec<String>,
}

/// Session store: bearer-token → session record, keyed by the raw token.
/// `last_activity_at` is updated on every successful auth.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn lookup(&self, token: &str) -> Result<Option<SessionRecord>>;
    async fn touch(&self, token: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Redis-backed session store: one string key per token, JSON-encoded.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: RedisClient,
}

impl RedisSessionStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn key(token: &str) -> String {
        format!("auth:session:{}", hash_token(token))
    }

    pub async fn create(&self, token: &str, record: &SessionRecord, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(record).map_err(CoreError::internal)?;
        self.redis.set_ex(&Self::key(token), &payload, ttl).await
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn lookup(&self, token: &str) -> Result<Option<SessionRecord>> {
        match self.redis.get(&Self::key(token)).await? {
            Some(payload) => {
                let record: SessionRecord =
                    serde_json::from_str(&payload).map_err(CoreError::internal)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn touch(&self, token: &str) -> Result<()> {
        if let Some(mut record) = self.lookup(token).await? {
            record.last_activity_at = Utc::now();
            let remaining = record.expires_at - Utc::now();
            let ttl = Duration::from_secs(remaining.num_seconds().max(1) as u64);
            let payload = serde_json::to_string(&record).map_err(CoreError::internal)?;
            self.redis.set_ex(&Self::key(token), &payload, ttl).await?;
        }
        Ok(())
    }
}

/// In-memory session store used by tests and single-process dev runs.
#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, record: SessionRecord) {
        self.sessions.insert(token.into(), record);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn lookup(&self, token: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(token).map(|r| r.clone()))
    }

    async fn touch(&self, token: &str) -> Result<()> {
        if let Some(mut record) = self.sessions.get_mut(token) {
            record.last_activity_at = Utc::now();
        }
        Ok(())
    }
}

/// Token blacklist: Redis set keyed by a digest rather than the raw token,
/// so a dump of the set never discloses live bearer tokens.
#[derive(Clone)]
pub struct TokenBlacklist {
    redis: RedisClient,
}

const BLACKLIST_KEY: &str = "auth:blacklist";

impl TokenBlacklist {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn revoke(&self, token: &str, remaining_lifetime: Duration) -> Result<()> {
        self.redis
            .sadd_ex(BLACKLIST_KEY, &hash_token(token), remaining_lifetime)
            .await
    }

    pub async fn contains(&self, token: &str) -> Result<bool> {
        self.redis.sismember(BLACKLIST_KEY, &hash_token(token)).await
    }
}

fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

/// True when the request identifies itself as a service-to-service caller,
/// which skips session validation but still requires a valid token (header
/// presence or an allow-listed user-agent substring).
pub fn is_service_call(headers: &axum::http::HeaderMap, allow_list: &[String]) -> bool {
    if headers
        .get("x-service-call")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return true;
    }
    if headers.contains_key("x-internal-service") {
        return true;
    }
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    allow_list
        .iter()
        .any(|candidate| user_agent.contains(&candidate.to_ascii_lowercase()))
}

/// Shared state the auth middleware closes over.
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub sessions: Arc<dyn SessionStore>,
    pub blacklist: TokenBlacklist,
}

fn extract_bearer(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Validates the bearer token and, unless the call is identified as
/// service-to-service, the backing session; stores `Claims` in request
/// extensions for downstream extractors and handlers.
pub async fn auth_middleware(
    State(state): State<Arc<AuthState>>,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response> {
    let token = extract_bearer(request.headers())
        .ok_or_else(|| CoreError::Unauthorized("missing bearer token".into()))?
        .to_string();

    if state.blacklist.contains(&token).await? {
        return Err(CoreError::Unauthorized("token revoked".into()));
    }

    let claims = decode_claims(&token, &state.config.jwt_secret)?;

    let service_call = is_service_call(request.headers(), &state.config.service_user_agents);
    if !service_call {
        let session = state
            .sessions
            .lookup(&token)
            .await?
            .ok_or_else(|| CoreError::Unauthorized("no active session".into()))?;
        if session.user_id != claims.user_id {
            return Err(CoreError::Unauthorized("session/token user mismatch".into()));
        }
        state.sessions.touch(&token).await?;
    }

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Decodes and verifies a bearer token's claims. Exposed so the WebSocket
/// surface (`?token=<jwt>` query param) can authenticate without going
/// through the `Authorization`-header middleware.
///
/// Claims carries its expiry as `expires_at`, not the registered `exp`
/// claim `jsonwebtoken`'s default validation looks for, so that default
/// validation (which requires `exp`) is disabled here in favor of our own
/// `expires_at` check.
pub fn decode_claims(token: &str, secret: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|err| CoreError::Unauthorized(format!("invalid token: {err}")))?;
    if data.claims.expires_at < Utc::now().timestamp() {
        return Err(CoreError::Unauthorized("token expired".into()));
    }
    Ok(data.claims)
}

/// `RequireRoles`/`RequirePermissions` — set-containment (AND) checks over
/// the claims stored by `auth_middleware`.
pub fn require_roles(claims: &Claims, required: &[&str]) -> Result<()> {
    let held: HashSet<&str> = claims.roles.iter().map(String::as_str).collect();
    if required.iter().all(|r| held.contains(r)) {
        Ok(())
    } else {
        Err(CoreError::Forbidden("missing required role".into()))
    }
}

pub fn require_permissions(claims: &Claims, required: &[&str]) -> Result<()> {
    let held: HashSet<&str> = claims.permissions.iter().map(String::as_str).collect();
    if required.iter().all(|p| held.contains(p)) {
        Ok(())
    } else {
        Err(CoreError::Forbidden("missing required permission".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn claims_with(roles: Vec<&str>, permissions: Vec<&str>) -> Claims {
        Claims {
            user_id: Uuid::new_v4(),
            email: "user@example.com".into(),
            roles: roles.into_iter().map(String::from).collect(),
            org_id: None,
            permissions: permissions.into_iter().map(String::from).collect(),
            expires_at: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        }
    }

    #[test]
    fn require_roles_is_all_of_not_any_of() {
        let claims = claims_with(vec!["admin"], vec![]);
        assert!(require_roles(&claims, &["admin"]).is_ok());
        assert!(require_roles(&claims, &["admin", "owner"]).is_err());
    }

    #[test]
    fn require_permissions_is_all_of_not_any_of() {
        let claims = claims_with(vec![], vec!["workflows:create", "workflows:read"]);
        assert!(require_permissions(&claims, &["workflows:create"]).is_ok());
        assert!(require_permissions(&claims, &["workflows:create", "workflows:delete"]).is_err());
    }

    #[test]
    fn is_service_call_detects_header_flag() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-service-call", "true".parse().unwrap());
        assert!(is_service_call(&headers, &[]));
    }

    #[test]
    fn is_service_call_detects_internal_service_header_presence() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-internal-service", "reports".parse().unwrap());
        assert!(is_service_call(&headers, &[]));
    }

    #[test]
    fn is_service_call_matches_allow_listed_user_agent() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "internal-cron/1.0".parse().unwrap(),
        );
        assert!(is_service_call(&headers, &["internal-cron".to_string()]));
    }

    #[test]
    fn is_service_call_false_for_ordinary_browser_request() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(axum::http::header::USER_AGENT, "Mozilla/5.0".parse().unwrap());
        assert!(!is_service_call(&headers, &["internal-cron".to_string()]));
    }

    #[test]
    fn decode_claims_round_trips_through_the_same_secret() {
        let secret = "test-secret";
        let claims = claims_with(vec!["member"], vec![]);
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let decoded = decode_claims(&token, secret).unwrap();
        assert_eq!(decoded.user_id, claims.user_id);
        assert_eq!(decoded.roles, claims.roles);
    }

    #[test]
    fn decode_claims_rejects_expired_token() {
        let secret = "test-secret";
        let mut claims = claims_with(vec![], vec![]);
        claims.expires_at = (Utc::now() - chrono::Duration::hours(1)).timestamp();
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        assert!(decode_claims(&token, secret).is_err());
    }

    #[test]
    fn decode_claims_rejects_wrong_secret() {
        let claims = claims_with(vec![], vec![]);
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"correct-secret"),
        )
        .unwrap();

        assert!(decode_claims(&token, "wrong-secret").is_err());
    }
}
