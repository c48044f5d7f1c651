//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid store reference: {0}")]
    InvalidReference(String),

    #[error("Failed to acquire credential: {0}")]
    Credential(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Store temporarily unavailable ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("Store request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Map an HTTP status and optional `x-ms-error-code` to an error.
    pub fn from_status(status: u16, error_code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();

        if status == 413 || error_code.is_some_and(|code| code.contains("Quota")) {
            return Self::QuotaExceeded(message);
        }

        match status {
            401 => Self::AuthFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            409 | 412 => Self::AlreadyExists(message),
            408 | 429 | 500 | 502 | 503 | 504 => Self::Transient { status, message },
            _ => Self::RequestFailed { status, message },
        }
    }

    /// Whether a single retry may succeed.
    ///
    /// Transport failures qualify: timeouts, failed connects, and connections
    /// dropped while sending the request or streaming the body. So do the
    /// transient status codes.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
            }
            _ => false,
        }
    }

    /// HTTP status the error corresponds to, for metrics.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::AuthFailed(_) | Self::Credential(_) => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::AlreadyExists(_) => Some(409),
            Self::QuotaExceeded(_) => Some(413),
            Self::Transient { status, .. } | Self::RequestFailed { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
