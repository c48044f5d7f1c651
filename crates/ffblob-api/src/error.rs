//! API error types.
//!
//! Every failure the service reports maps to exactly one `kind` and status
//! code here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::warn;

use ffblob_media::{DirectiveError, MediaError};
use ffblob_models::{ErrorBody, RequestError, RequestId};
use ffblob_storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Command rejected: {0}")]
    RejectedCommand(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("{message}")]
    Process {
        message: String,
        stderr: Option<String>,
    },

    #[error("{0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process {
            message: msg.into(),
            stderr: None,
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map a failed upload. A missing destination is a store-side failure,
    /// not a missing input.
    pub fn from_upload(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => ApiError::Store(format!("destination not found: {}", e)),
            other => other.into(),
        }
    }

    /// Stable failure class reported in the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::RejectedCommand(_) => "rejected_command",
            ApiError::Authentication(_) => "authentication",
            ApiError::Authorization(_) => "authorization",
            ApiError::NotFound(_) => "not_found",
            ApiError::Store(_) => "store",
            ApiError::Process { .. } => "process",
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RejectedCommand(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Store(_) | ApiError::Process { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Build the response body, hiding internal details in production.
    pub fn to_body(&self, request_id: Option<&RequestId>, production: bool) -> ErrorBody {
        let message = match self {
            ApiError::Internal(_) if production => "An internal error occurred".to_string(),
            _ => self.to_string(),
        };

        let stderr = match self {
            ApiError::Process { stderr, .. } => stderr.clone(),
            _ => None,
        };

        ErrorBody {
            message,
            kind: self.kind().to_string(),
            stderr,
            request_id: request_id.map(|id| id.to_string()),
        }
    }

    /// Render as an HTTP response carrying the request id.
    pub fn into_response_with(self, request_id: &RequestId, production: bool) -> Response {
        let body = self.to_body(Some(request_id), production);
        (self.status_code(), Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let production = std::env::var("ENVIRONMENT").unwrap_or_default() == "production";
        let body = self.to_body(None, production);
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<DirectiveError> for ApiError {
    fn from(e: DirectiveError) -> Self {
        match e {
            DirectiveError::Empty => ApiError::Validation("Missing required field: ffmpegCommand".to_string()),
            other => ApiError::RejectedCommand(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidReference(msg) => ApiError::Validation(msg),
            StorageError::Credential(_) | StorageError::AuthFailed(_) => {
                ApiError::Authentication(e.to_string())
            }
            StorageError::Forbidden(_) => ApiError::Authorization(e.to_string()),
            StorageError::NotFound(_) => ApiError::NotFound(e.to_string()),
            _ => ApiError::Store(e.to_string()),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Timeout(_) => ApiError::Timeout(e.to_string()),
            MediaError::Spawn(_) => ApiError::process(e.to_string()),
            MediaError::FfmpegNotFound | MediaError::FfmpegNotUsable(_) => {
                ApiError::process("FFmpeg binary not found")
            }
            MediaError::Io(_) | MediaError::Internal(_) => {
                warn!("Media operation failed: {}", e);
                ApiError::internal("media operation failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_and_status_table() {
        let cases = [
            (ApiError::validation("x"), "validation", 400),
            (ApiError::RejectedCommand("x".into()), "rejected_command", 422),
            (ApiError::Authentication("x".into()), "authentication", 401),
            (ApiError::Authorization("x".into()), "authorization", 403),
            (ApiError::NotFound("x".into()), "not_found", 404),
            (ApiError::Store("x".into()), "store", 500),
            (ApiError::process("x"), "process", 500),
            (ApiError::timeout("x"), "timeout", 504),
            (ApiError::internal("x"), "internal", 500),
        ];

        for (error, kind, status) in cases {
            assert_eq!(error.kind(), kind);
            assert_eq!(error.status_code().as_u16(), status);
        }
    }

    #[test]
    fn test_directive_errors() {
        assert_eq!(ApiError::from(DirectiveError::Empty).kind(), "validation");
        assert_eq!(ApiError::from(DirectiveError::InputOverride).kind(), "rejected_command");
        assert_eq!(ApiError::from(DirectiveError::RemoteReference).kind(), "rejected_command");
    }

    #[test]
    fn test_storage_errors() {
        assert_eq!(ApiError::from(StorageError::from_status(401, None, "x")).kind(), "authentication");
        assert_eq!(ApiError::from(StorageError::credential("x")).kind(), "authentication");
        assert_eq!(ApiError::from(StorageError::from_status(403, None, "x")).kind(), "authorization");
        assert_eq!(ApiError::from(StorageError::from_status(404, None, "x")).kind(), "not_found");
        assert_eq!(ApiError::from(StorageError::from_status(409, None, "x")).kind(), "store");
        assert_eq!(ApiError::from(StorageError::from_status(503, None, "x")).kind(), "store");
        assert_eq!(ApiError::from(StorageError::invalid_reference("x")).kind(), "validation");
    }

    #[test]
    fn test_media_errors() {
        assert_eq!(ApiError::from(MediaError::Timeout(Duration::from_secs(5))).kind(), "timeout");
        assert_eq!(ApiError::from(MediaError::FfmpegNotFound).kind(), "process");

        let io = std::io::Error::other("failed at /srv/scratch/ffblob-x");
        let err = ApiError::from(MediaError::Io(io));
        assert_eq!(err.kind(), "internal");
        assert!(!err.to_body(None, false).message.contains("/srv/scratch"));
    }

    #[test]
    fn test_upload_not_found_is_store_error() {
        let err = ApiError::from_upload(StorageError::from_status(404, Some("ContainerNotFound"), "x"));
        assert_eq!(err.kind(), "store");
        assert_eq!(err.status_code().as_u16(), 500);
        assert_eq!(
            ApiError::from_upload(StorageError::from_status(403, None, "x")).kind(),
            "authorization"
        );
    }

    #[test]
    fn test_body_includes_stderr_and_request_id() {
        let error = ApiError::Process {
            message: "ffmpeg exited with status 1".into(),
            stderr: Some("Invalid argument".into()),
        };
        let id = RequestId("req-1".to_string());
        let body = error.to_body(Some(&id), false);

        assert_eq!(body.kind, "process");
        assert_eq!(body.stderr.as_deref(), Some("Invalid argument"));
        assert_eq!(body.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_production_hides_internal_details() {
        let body = ApiError::internal("disk /tmp/ffblob-x full").to_body(None, true);
        assert_eq!(body.message, "An internal error occurred");
    }
}
