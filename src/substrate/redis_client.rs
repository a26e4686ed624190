// Thin Redis abstraction shared by rate limiting, response cache, session
// store, token blacklist, and the dashboard pub/sub bus. Used for rate-limit
// counters, response cache, and pub/sub — no cross-key transactions needed.

use crate::error::{CoreError, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// A cloneable handle to a Redis connection manager. `ConnectionManager`
/// multiplexes over a single connection and reconnects transparently, so
/// cloning this is cheap and safe to share across every request.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
    redis_url: String,
}

impl RedisClient {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(CoreError::internal)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(CoreError::internal)?;
        Ok(Self {
            manager,
            redis_url: redis_url.to_string(),
        })
    }

    /// Atomic increment-and-expire used by the sliding-window rate limiter:
    /// `INCR key; EXPIRE key ttl` wrapped so the window only resets on the
    /// first hit within a period.
    pub async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.manager.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(CoreError::internal)?;
        if count == 1 {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .map_err(CoreError::internal)?;
        }
        Ok(count)
    }

    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.ttl(key).await.map_err(CoreError::internal)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(CoreError::internal)
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl.as_secs()).await.map_err(CoreError::internal)
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.del(key).await.map_err(CoreError::internal)?;
        Ok(())
    }

    /// Deletes every key matching `pattern` (a Redis glob, trailing `*`
    /// supported). Used by cache invalidation (`CacheInvalidate`).
    pub async fn del_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn.keys(pattern).await.map_err(CoreError::internal)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted: u64 = conn.del(&keys).await.map_err(CoreError::internal)?;
        Ok(deleted)
    }

    pub async fn sadd_ex(&self, set_key: &str, member: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.sadd(set_key, member).await.map_err(CoreError::internal)?;
        let _: () = conn
            .expire(set_key, ttl.as_secs() as i64)
            .await
            .map_err(CoreError::internal)?;
        Ok(())
    }

    pub async fn sismember(&self, set_key: &str, member: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        conn.sismember(set_key, member).await.map_err(CoreError::internal)
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.publish(channel, payload).await.map_err(CoreError::internal)?;
        Ok(())
    }

    /// Used by the readiness probe (`/health/ready`).
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(CoreError::internal)?;
        Ok(())
    }

    /// A fresh pub/sub connection. Each subscriber owns its own connection —
    /// `ConnectionManager` is for request/response commands only.
    pub async fn subscriber(&self) -> Result<redis::aio::PubSub> {
        let client =
            redis::Client::open(self.manager_addr()).map_err(CoreError::internal)?;
        let conn = client.get_async_connection().await.map_err(CoreError::internal)?;
        Ok(conn.into_pubsub())
    }

    fn manager_addr(&self) -> String {
        // ConnectionManager doesn't expose its connection info; callers
        // configure the same URL at construction time via AppConfig, so we
        // keep a copy for building independent pub/sub connections.
        self.redis_url.clone()
    }
}
