//! Process environment surface.
//!
//! Everything the embedding service reads from the environment lives in one
//! `Specification`, loaded once at startup by the composition root. The engine
//! itself only consumes the redis fields, the backend selector and the log
//! level; the server knobs are carried for the surrounding transport layer.

use std::time::Duration;

use tracing::Level;

use crate::errors::{RateLimitError, Result};

/// Validated process environment.
#[derive(Debug, Clone)]
pub struct Specification {
    /// Bind address for the embedding server (e.g. ":8080" or "0.0.0.0:8080").
    pub server_addr: String,
    pub server_read_timeout: Duration,
    pub server_write_timeout: Duration,
    pub server_max_header_bytes: usize,

    /// Redis address, e.g. "localhost:6379". Required unless
    /// `use_memory_storage` is set.
    pub redis_addr: Option<String>,
    pub redis_password: String,
    pub redis_db: i64,
    pub redis_pool_size: usize,

    /// Select the in-process memory backend instead of Redis.
    pub use_memory_storage: bool,

    /// Path to the rate-limits JSON file.
    pub config_file: String,

    pub app_name: String,
    pub log_level: Level,
}

impl Specification {
    /// Load the specification from process environment variables.
    ///
    /// Fails when `REDIS_ADDR` is missing while the Redis backend is
    /// selected, or when a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        let use_memory_storage = env_bool("USE_MEMORY_STORAGE", false);

        let redis_addr = std::env::var("REDIS_ADDR").ok().filter(|v| !v.is_empty());
        if redis_addr.is_none() && !use_memory_storage {
            return Err(RateLimitError::Env(
                "REDIS_ADDR is required unless USE_MEMORY_STORAGE is set".to_string(),
            ));
        }

        Ok(Self {
            server_addr: env_string("SERVER_ADDR", ":8080"),
            server_read_timeout: Duration::from_secs(env_parse("SERVER_READ_TIMEOUT_SECS", 10)?),
            server_write_timeout: Duration::from_secs(env_parse("SERVER_WRITE_TIMEOUT_SECS", 10)?),
            server_max_header_bytes: env_parse("SERVER_MAX_HEADER_BYTES", 1 << 20)?,
            redis_addr,
            redis_password: env_string("REDIS_PASSWORD", ""),
            redis_db: env_parse("REDIS_DB", 0)?,
            redis_pool_size: env_parse("REDIS_POOL_SIZE", 100)?,
            use_memory_storage,
            config_file: env_string("CONFIG_FILE", "./config.json"),
            app_name: env_string("APP_NAME", "ratekeeper"),
            log_level: parse_log_level(&env_string("LOG_LEVEL", "debug"))?,
        })
    }

    /// Redis connection URL assembled from the addr/password/db fields.
    pub fn redis_url(&self) -> Result<String> {
        let addr = self.redis_addr.as_deref().ok_or_else(|| {
            RateLimitError::Env("REDIS_ADDR is not configured".to_string())
        })?;

        let url = if self.redis_password.is_empty() {
            format!("redis://{}/{}", addr, self.redis_db)
        } else {
            format!("redis://:{}@{}/{}", self.redis_password, addr, self.redis_db)
        };
        Ok(url)
    }
}

impl Default for Specification {
    fn default() -> Self {
        Self {
            server_addr: ":8080".to_string(),
            server_read_timeout: Duration::from_secs(10),
            server_write_timeout: Duration::from_secs(10),
            server_max_header_bytes: 1 << 20,
            redis_addr: None,
            redis_password: String::new(),
            redis_db: 0,
            redis_pool_size: 100,
            use_memory_storage: false,
            config_file: "./config.json".to_string(),
            app_name: "ratekeeper".to_string(),
            log_level: Level::DEBUG,
        }
    }
}

/// Map a textual log level to a tracing level.
pub fn parse_log_level(value: &str) -> Result<Level> {
    match value.to_lowercase().as_str() {
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(RateLimitError::Env(format!(
            "log level must be one of debug, info, warn, error (got {:?})",
            other
        ))),
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1"
        })
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            RateLimitError::Env(format!("{} has an invalid value: {:?}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
