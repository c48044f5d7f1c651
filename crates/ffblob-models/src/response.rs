//! Response bodies.

use serde::{Deserialize, Serialize};

/// Successful transcode response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeResponse {
    /// URL of the uploaded output object
    pub output_blob_url: String,
}

/// Error response body.
///
/// Never carries local paths, credentials or the executed command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Short human-readable reason
    pub message: String,
    /// Failure class (e.g. "validation", "not_found", "process")
    pub kind: String,
    /// Bounded, sanitized stderr excerpt for process failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Correlation id of the failed request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
