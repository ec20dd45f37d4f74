//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use trellis_core::{Error, Result, TrimPolicy};

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9000";
/// Default task cache weight bound.
pub const DEFAULT_TASK_CACHE_MAX_WEIGHT: usize = 64 * 1024 * 1024;
/// Default orphan cache weight bound.
pub const DEFAULT_ORPHAN_CACHE_MAX_WEIGHT: usize = 16 * 1024 * 1024;
/// Default bound on individual store/cache calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Which cache backend serves the task and orphan caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    /// In-process weight-bounded maps.
    #[default]
    Local,
    /// Shared external Redis deployment.
    Redis,
}

impl std::str::FromStr for CacheBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "redis" => Ok(Self::Redis),
            other => Err(Error::Config {
                message: format!("unknown cache backend: {other}"),
            }),
        }
    }
}

/// Configuration for the ingest server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds.
    pub listen_addr: SocketAddr,
    /// Development mode: pretty logs instead of JSON.
    pub debug: bool,
    /// Cache backend selection.
    pub cache_backend: CacheBackend,
    /// Redis URL, required for the Redis backend.
    pub redis_url: Option<String>,
    /// Task cache weight bound (local backend).
    pub task_cache_max_weight: usize,
    /// Orphan cache aggregate weight bound (local backend).
    pub orphan_cache_max_weight: usize,
    /// Attribute trimming policy applied at merge time.
    pub trim: TrimPolicy,
    /// Bound on individual store/cache calls.
    pub call_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.parse().expect("default listen addr"),
            debug: false,
            cache_backend: CacheBackend::Local,
            redis_url: None,
            task_cache_max_weight: DEFAULT_TASK_CACHE_MAX_WEIGHT,
            orphan_cache_max_weight: DEFAULT_ORPHAN_CACHE_MAX_WEIGHT,
            trim: TrimPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `TRELLIS_*` environment variables, falling
    /// back to defaults.
    ///
    /// # Errors
    ///
    /// Returns a config error when a variable fails to parse or the chosen
    /// cache backend is missing its settings.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("TRELLIS_LISTEN_ADDR") {
            config.listen_addr = raw.parse().map_err(|_| Error::Config {
                message: format!("TRELLIS_LISTEN_ADDR has an invalid value: {raw}"),
            })?;
        }
        config.debug = std::env::var("TRELLIS_DEBUG").map(|v| v == "true").unwrap_or(false);
        if let Ok(raw) = std::env::var("TRELLIS_CACHE_BACKEND") {
            config.cache_backend = raw.parse()?;
        }
        config.redis_url = std::env::var("TRELLIS_REDIS_URL").ok();
        if let Some(v) = env_parse::<usize>("TRELLIS_TASK_CACHE_MAX_WEIGHT")? {
            config.task_cache_max_weight = v;
        }
        if let Some(v) = env_parse::<usize>("TRELLIS_ORPHAN_CACHE_MAX_WEIGHT")? {
            config.orphan_cache_max_weight = v;
        }
        if let Some(v) = env_parse::<usize>("TRELLIS_TRIM_MAX_CHARS")? {
            config.trim = TrimPolicy::new(v);
        }
        if let Some(v) = env_parse::<u64>("TRELLIS_CALL_TIMEOUT_MS")? {
            config.call_timeout = Duration::from_millis(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error for inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.cache_backend == CacheBackend::Redis && self.redis_url.is_none() {
            return Err(Error::Config {
                message: "TRELLIS_REDIS_URL is required for the redis cache backend".into(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| Error::Config {
            message: format!("{name} has an invalid value: {raw}"),
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_backend, CacheBackend::Local);
    }

    #[test]
    fn redis_backend_requires_a_url() {
        let config = ServerConfig {
            cache_backend: CacheBackend::Redis,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cache_backend_parses_case_insensitively() {
        assert_eq!("Local".parse::<CacheBackend>().unwrap(), CacheBackend::Local);
        assert_eq!("REDIS".parse::<CacheBackend>().unwrap(), CacheBackend::Redis);
        assert!("memcached".parse::<CacheBackend>().is_err());
    }
}
