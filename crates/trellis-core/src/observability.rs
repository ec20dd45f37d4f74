//! Observability infrastructure for Trellis.
//!
//! Structured logging with consistent spans across the client and server
//! crates. Initialization is `Once`-guarded so libraries and tests can call
//! it freely.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times; subsequent
/// calls are no-ops. `RUST_LOG` controls log levels.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for batch ingest operations.
#[must_use]
pub fn ingest_span(operation: &str, env: Option<&str>, events: usize) -> Span {
    tracing::info_span!(
        "ingest",
        op = operation,
        env = env.unwrap_or("-"),
        events = events,
    )
}

/// Creates a span for per-task reconciliation.
#[must_use]
pub fn reconcile_span(task_id: &str) -> Span {
    tracing::info_span!("reconcile", task_id = task_id)
}
