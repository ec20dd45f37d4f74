//! Error types shared across the Trellis pipeline.

use crate::id::TaskId;

/// The result type used throughout the Trellis crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tracing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed validation.
    #[error("invalid id: {message}")]
    InvalidId {
        /// Description of the failure.
        message: String,
    },

    /// Configuration is missing or malformed.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the failure.
        message: String,
    },

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A network delivery attempt failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// HTTP status code, when the server answered at all.
        status: Option<u16>,
    },

    /// A durable-store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A cache backend operation failed.
    #[error("cache error: {message}")]
    Cache {
        /// Description of the failure.
        message: String,
    },

    /// An event declared itself as its own parent.
    #[error("task {task_id} declares itself as its own parent")]
    SelfParent {
        /// The offending task id.
        task_id: TaskId,
    },
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new transport error without an HTTP status.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Creates a new transport error carrying the server's HTTP status.
    #[must_use]
    pub fn transport_status(message: impl Into<String>, status: u16) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Returns true when retrying the failed operation could succeed.
    ///
    /// Encoding failures are permanent; transport and storage failures are
    /// transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Storage { .. })
    }
}
