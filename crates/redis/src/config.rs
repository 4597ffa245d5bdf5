//! Connection configuration for the coordination-service client.

use smarterbase_core::{StoreError, StoreResult};

const MANAGED_TLS_PORT: &str = "25061";

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: Option<String>,
    pub db: i64,
    pub tls_enabled: bool,
    /// Namespaces every key this crate writes (locks, indexes, counters).
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            password: None,
            db: 0,
            tls_enabled: false,
            key_prefix: "smarterbase".to_string(),
        }
    }
}

impl RedisConfig {
    pub fn from_env() -> StoreResult<Self> {
        let addr = std::env::var("REDIS_ADDR").unwrap_or_else(|_| "localhost:6379".to_string());
        let password = std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty());
        let db = match std::env::var("REDIS_DB") {
            Ok(v) => v.parse::<i64>().map_err(|e| StoreError::invalid_config(format!("REDIS_DB: {e}")))?,
            Err(_) => 0,
        };

        let port_is_managed_tls = addr.rsplit(':').next() == Some(MANAGED_TLS_PORT);
        let tls_enabled = match std::env::var("REDIS_TLS_ENABLED") {
            Ok(v) => v.eq_ignore_ascii_case("true") || port_is_managed_tls,
            Err(_) => port_is_managed_tls,
        };

        Ok(Self { addr, password, db, tls_enabled, key_prefix: "smarterbase".to_string() })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn to_url(&self) -> String {
        // `rediss://` derives its TLS server name from the host portion of
        // this URL, so no separate SNI parameter is needed.
        let scheme = if self.tls_enabled { "rediss" } else { "redis" };
        let auth = match &self.password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        format!("{scheme}://{auth}{}/{}", self.addr, self.db)
    }

    pub fn create_pool(&self) -> StoreResult<deadpool_redis::Pool> {
        let cfg = deadpool_redis::Config::from_url(self.to_url());
        cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| StoreError::invalid_config(format!("cannot build redis pool: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_plaintext_localhost() {
        let config = RedisConfig::default();
        assert_eq!(config.addr, "localhost:6379");
        assert!(!config.tls_enabled);
        assert_eq!(config.to_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn managed_port_implies_tls_url_scheme() {
        let config = RedisConfig {
            addr: "db.example.com:25061".to_string(),
            tls_enabled: true,
            ..Default::default()
        };
        assert!(config.to_url().starts_with("rediss://"));
    }

    #[test]
    fn password_is_embedded_in_url() {
        let config = RedisConfig { password: Some("hunter2".to_string()), ..Default::default() };
        assert_eq!(config.to_url(), "redis://:hunter2@localhost:6379/0");
    }
}
