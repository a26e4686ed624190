// Application configuration.
//
//! One typed, loaded-once `AppConfig`, built with the `config` crate
//! layered over `dotenv`.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: String,
    pub server_host: String,
    pub server_port: u16,

    pub database_url: String,
    pub redis_url: String,

    pub jwt_secret: String,

    /// User-agent substrings that identify service-to-service callers,
    /// bypassing session validation.
    pub service_user_agents: Vec<String>,

    pub rate_limit_max_attempts: u32,
    pub rate_limit_window_secs: u64,

    pub cache_default_ttl_secs: u64,
    pub cache_key_prefix: String,

    pub circuit_failure_threshold: u32,
    pub circuit_success_threshold: u32,
    pub circuit_open_timeout_secs: u64,
    pub circuit_half_open_max_requests: u32,

    pub dashboard_debounce_ms: u64,
    pub dashboard_heartbeat_secs: u64,
    pub dashboard_idle_timeout_secs: u64,
    pub dashboard_outbound_queue_capacity: usize,

    pub worker_pool_size: usize,
    pub step_default_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 4000,
            database_url: "postgres://localhost/taskflow".to_string(),
            redis_url: "redis://127.0.0.1/".to_string(),
            jwt_secret: "dev-secret-change-me".to_string(),
            service_user_agents: vec!["taskflow-internal".to_string()],
            rate_limit_max_attempts: 100,
            rate_limit_window_secs: 60,
            cache_default_ttl_secs: 30,
            cache_key_prefix: "cache".to_string(),
            circuit_failure_threshold: 5,
            circuit_success_threshold: 2,
            circuit_open_timeout_secs: 30,
            circuit_half_open_max_requests: 3,
            dashboard_debounce_ms: 100,
            dashboard_heartbeat_secs: 15,
            dashboard_idle_timeout_secs: 60,
            dashboard_outbound_queue_capacity: 64,
            worker_pool_size: 16,
            step_default_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from `.env` (if present) plus environment
    /// variables prefixed `TASKFLOW_` (e.g. `TASKFLOW_SERVER_PORT`).
    pub fn load() -> anyhow::Result<Self> {
        if let Err(e) = dotenv::dotenv() {
            tracing::debug!("no .env file loaded: {}", e);
        }

        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("TASKFLOW").separator("__"))
            .build()?;

        // `#[serde(default)]` on AppConfig fills in anything the
        // environment didn't override with AppConfig::default()'s values.
        Ok(cfg.try_deserialize()?)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_default_ttl_secs)
    }

    pub fn circuit_open_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_open_timeout_secs)
    }

    pub fn dashboard_debounce(&self) -> Duration {
        Duration::from_millis(self.dashboard_debounce_ms)
    }

    pub fn dashboard_heartbeat(&self) -> Duration {
        Duration::from_secs(self.dashboard_heartbeat_secs)
    }

    pub fn dashboard_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.dashboard_idle_timeout_secs)
    }

    pub fn step_default_timeout(&self) -> Duration {
        Duration::from_secs(self.step_default_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_derives_durations_from_their_secs_fields() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.cache_default_ttl(), Duration::from_secs(30));
        assert_eq!(config.circuit_open_timeout(), Duration::from_secs(30));
        assert_eq!(config.dashboard_debounce(), Duration::from_millis(100));
        assert_eq!(config.dashboard_heartbeat(), Duration::from_secs(15));
        assert_eq!(config.dashboard_idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.step_default_timeout(), Duration::from_secs(30));
    }
}
