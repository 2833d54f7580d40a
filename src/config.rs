//! Service configuration.
//!
//! Read once at startup from a TOML file and passed by reference into the
//! pieces that need it. Nothing reads configuration at request time.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! log_level = "info"
//! jwt_secret = "change-me"
//!
//! [cache]
//! enabled = true
//! backend = "redis"
//! ttl_secs = 60
//! redis_url = "redis://127.0.0.1:6379"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// HS256 signing and verification key.
    pub jwt_secret: String,
    pub token_lifetime_secs: u64,
    /// bcrypt cost for stored passwords.
    pub password_cost: u32,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_owned(),
            jwt_secret: String::new(),
            token_lifetime_secs: 24 * 60 * 60,
            password_cost: bcrypt::DEFAULT_COST,
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    /// Lifetime of a cached response.
    pub ttl_secs: u64,
    /// Upper bound on every cache call; slower calls count as misses.
    pub timeout_ms: u64,
    pub redis_url: String,
    pub pool_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: CacheBackendKind::Memory,
            ttl_secs: 60,
            timeout_ms: 250,
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            pool_size: 16,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must be set"));
        }
        if self.token_lifetime_secs == 0 {
            return Err(ConfigError::Invalid("token_lifetime_secs must be > 0"));
        }
        if self.cache.enabled {
            if self.cache.ttl_secs == 0 {
                return Err(ConfigError::Invalid("cache.ttl_secs must be > 0"));
            }
            if self.cache.timeout_ms == 0 {
                return Err(ConfigError::Invalid("cache.timeout_ms must be > 0"));
            }
        }
        Ok(())
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }
}
