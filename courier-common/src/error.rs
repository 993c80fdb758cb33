//! Error types for the courier services.

use thiserror::Error;

/// Result type alias using the courier error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for courier services.
///
/// Validation and staleness outcomes are returned as typed results
/// by the session layer; only malformed configuration at startup is
/// allowed to be fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at process start)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Skill caller not present in the allow-list
    #[error("Caller '{0}' is not an allowed caller")]
    Unauthorized(String),

    /// No conversation reference exists for the correlation id
    #[error("No session known for correlation id '{0}'")]
    SessionUnknown(String),

    /// Dispatch attempted after lifecycle closure
    #[error("Session '{0}' is closed")]
    SessionClosed(String),

    /// Transport-level failure from a channel adapter
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this is an allow-list rejection.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Check if this error means the session cannot receive messages.
    pub const fn is_session_gone(&self) -> bool {
        matches!(self, Self::SessionUnknown(_) | Self::SessionClosed(_))
    }

    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 403,
            Self::SessionUnknown(_) | Self::NotFound(_) => 404,
            Self::SessionClosed(_) => 410,
            Self::InvalidInput(_) => 400,
            Self::ChannelSend(_) => 502,
            Self::Timeout => 408,
            Self::WithContext { source, .. } => source.status_code(),
            _ => 500,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
