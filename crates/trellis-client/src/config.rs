//! Reporter configuration.

use std::time::Duration;

use trellis_core::{Error, Result};

/// Default number of sender workers.
pub const DEFAULT_NUM_WORKERS: usize = 2;
/// Default buffer capacity in events.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;
/// Default buffer capacity in bytes.
pub const DEFAULT_MAX_BUFFER_WEIGHT: usize = 16 * 1024 * 1024;
/// Default number of events per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 200;
/// Default maximum wait before a partial batch is flushed.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(3);
/// Default connect/read timeout for the HTTP transport.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of delivery attempts per batch.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default backoff time unit; attempt `n` sleeps `base * 2^n`.
pub const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Default grace period for in-flight sends on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(800);

/// Configuration for the event reporter and its sender pool.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Base URL of the Trellis server (events are POSTed to `{url}/events`).
    pub endpoint: String,
    /// Environment tag stamped on every outgoing batch.
    pub env: Option<String>,
    /// Number of concurrent sender workers.
    pub num_workers: usize,
    /// Buffer capacity in events.
    pub max_buffer_size: usize,
    /// Buffer capacity in aggregate event weight (bytes).
    pub max_buffer_weight: usize,
    /// Maximum events per batch.
    pub max_batch_size: usize,
    /// Maximum wait for a batch to fill before a forced flush.
    pub flush_interval: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// HTTP read timeout.
    pub read_timeout: Duration,
    /// Delivery attempts per batch before the batch is dropped.
    pub max_retries: u32,
    /// Backoff time unit; attempt `n` is followed by a `base * 2^n` sleep.
    pub retry_backoff_base: Duration,
    /// Grace period for in-flight sends when closing.
    pub shutdown_grace: Duration,
}

impl ReporterConfig {
    /// Creates a configuration with defaults for the given server endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            env: None,
            num_workers: DEFAULT_NUM_WORKERS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_buffer_weight: DEFAULT_MAX_BUFFER_WEIGHT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            connect_timeout: DEFAULT_HTTP_TIMEOUT,
            read_timeout: DEFAULT_HTTP_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Loads configuration from `TRELLIS_*` environment variables.
    ///
    /// `TRELLIS_SERVER_URL` is required; every other option falls back to its
    /// default.
    ///
    /// # Errors
    ///
    /// Returns a config error when the endpoint is missing or a numeric
    /// variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("TRELLIS_SERVER_URL").map_err(|_| Error::Config {
            message: "TRELLIS_SERVER_URL must be set".into(),
        })?;

        let mut config = Self::new(endpoint);
        config.env = std::env::var("TRELLIS_ENV").ok();
        if let Some(v) = env_parse::<usize>("TRELLIS_NUM_WORKERS")? {
            config.num_workers = v;
        }
        if let Some(v) = env_parse::<usize>("TRELLIS_MAX_BUFFER_SIZE")? {
            config.max_buffer_size = v;
        }
        if let Some(v) = env_parse::<usize>("TRELLIS_MAX_BUFFER_WEIGHT")? {
            config.max_buffer_weight = v;
        }
        if let Some(v) = env_parse::<usize>("TRELLIS_MAX_BATCH_SIZE")? {
            config.max_batch_size = v;
        }
        if let Some(v) = env_parse::<u64>("TRELLIS_FLUSH_INTERVAL_MS")? {
            config.flush_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("TRELLIS_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("TRELLIS_READ_TIMEOUT_MS")? {
            config.read_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u32>("TRELLIS_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("TRELLIS_RETRY_BACKOFF_BASE_MS")? {
            config.retry_backoff_base = Duration::from_millis(v);
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the environment tag.
    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Sets the number of sender workers.
    #[must_use]
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Sets the buffer capacity in events.
    #[must_use]
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Sets the buffer capacity in bytes.
    #[must_use]
    pub fn with_max_buffer_weight(mut self, max_buffer_weight: usize) -> Self {
        self.max_buffer_weight = max_buffer_weight;
        self
    }

    /// Sets the maximum events per batch.
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets the forced-flush interval.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Sets the number of delivery attempts per batch.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff time unit.
    #[must_use]
    pub fn with_retry_backoff_base(mut self, base: Duration) -> Self {
        self.retry_backoff_base = base;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a config error when a field is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config {
                message: "server endpoint must not be empty".into(),
            });
        }
        if self.num_workers == 0 {
            return Err(Error::Config {
                message: "num_workers must be at least 1".into(),
            });
        }
        if self.max_batch_size == 0 {
            return Err(Error::Config {
                message: "max_batch_size must be at least 1".into(),
            });
        }
        if self.max_retries == 0 {
            return Err(Error::Config {
                message: "max_retries must be at least 1".into(),
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
        let config = ReporterConfig::new("http://localhost:9000");
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let config = ReporterConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = ReporterConfig::new("http://localhost:9000").with_num_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = ReporterConfig::new("http://localhost:9000")
            .with_env("staging")
            .with_max_batch_size(50)
            .with_retry_backoff_base(Duration::from_millis(10));

        assert_eq!(config.env.as_deref(), Some("staging"));
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.retry_backoff_base, Duration::from_millis(10));
    }
}
