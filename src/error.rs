use thiserror::Error;

/// Failures internal to the cache layer.
///
/// None of these variants escape the public [`CacheService`](crate::CacheService)
/// surface: every public operation converts them into its documented safe
/// default (miss, no-op, pass-through). They exist so the backend and the
/// service can reason about *why* an operation failed before degrading.
///
/// Backend *absence* (credentials never configured, offline build) is not
/// an error at all: the backend factory returns `None` and the service
/// skips straight to its degraded path.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The HTTP request to the backend could not complete.
    #[error("backend transport failed: {message}")]
    Transport { message: String },
    /// The backend accepted the request but reported a command error.
    #[error("backend rejected command: {message}")]
    Backend { message: String },
    /// The backend answered with a payload this client does not understand.
    #[error("unexpected backend response: {message}")]
    Protocol { message: String },
    /// A value could not be serialized for storage.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
