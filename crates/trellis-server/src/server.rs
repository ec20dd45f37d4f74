//! Ingest server bootstrap.

use std::sync::Arc;

use trellis_core::{Error, Result};

use crate::cache::local::LocalCacheHandler;
use crate::cache::redis::{RedisCacheHandler, DEFAULT_TTL_SECONDS};
use crate::cache::CacheHandler;
use crate::config::{CacheBackend, ServerConfig};
use crate::reconcile::Reconciler;
use crate::routes::{router, AppState};
use crate::store::TaskStore;

/// The Trellis ingest server.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Assembles a server over the given durable store, choosing the cache
    /// backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured cache backend cannot be built.
    pub async fn new(config: ServerConfig, store: Arc<dyn TaskStore>) -> Result<Self> {
        config.validate()?;

        let cache: Arc<dyn CacheHandler> = match config.cache_backend {
            CacheBackend::Local => Arc::new(LocalCacheHandler::new(
                config.task_cache_max_weight,
                config.orphan_cache_max_weight,
            )),
            CacheBackend::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| Error::Config {
                    message: "redis cache backend requires a url".into(),
                })?;
                tracing::info!("using redis cache backend");
                Arc::new(RedisCacheHandler::connect(url, DEFAULT_TTL_SECONDS).await?)
            }
        };

        let reconciler = Reconciler::new(store, cache)
            .with_trim_policy(config.trim.clone())
            .with_call_timeout(config.call_timeout);

        Ok(Self {
            config,
            state: AppState {
                reconciler: Arc::new(reconciler),
            },
        })
    }

    /// The router this server will serve; exposed for in-process tests.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        router(self.state.clone())
    }

    /// Binds the listen address and serves until ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns an error when binding or serving fails.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                Error::storage_with_source(
                    format!("failed to bind {}", self.config.listen_addr),
                    e,
                )
            })?;
        tracing::info!(addr = %self.config.listen_addr, "trellis ingest server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::storage_with_source("server error", e))
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
