//! `trellis-server` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the ingest
//! server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;

use trellis_core::observability::{init_logging, LogFormat};
use trellis_server::config::ServerConfig;
use trellis_server::server::Server;
use trellis_server::store::memory::InMemoryTaskStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;

    init_logging(if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    // The durable store is an external collaborator; this process ships with
    // the in-memory implementation and production deployments wire their own
    // behind the TaskStore trait.
    tracing::warn!("using in-memory task store; records do not survive a restart");
    let store = Arc::new(InMemoryTaskStore::new());

    let server = Server::new(config, store).await?;
    server.serve().await?;
    Ok(())
}
