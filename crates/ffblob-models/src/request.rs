//! Transcode request definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Maximum accepted length for either URL field.
pub const MAX_URL_LENGTH: usize = 2048;

/// Errors produced while structurally validating a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Missing required field: {0}")]
    Missing(&'static str),

    #[error("Invalid URL in {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

/// Raw transcode request as received over HTTP.
///
/// Every field is optional here so that a missing field is reported as a
/// validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeRequest {
    /// Fully-qualified URL of the source blob (account, container and path)
    #[serde(default)]
    pub input_blob_url: Option<String>,
    /// Fully-qualified URL of the destination container
    #[serde(default)]
    pub output_container_name: Option<String>,
    /// FFmpeg flags and filters, without input/output file arguments
    #[serde(default)]
    pub ffmpeg_command: Option<String>,
}

impl TranscodeRequest {
    /// Validate presence of all fields and URL syntax.
    ///
    /// Performs no I/O.
    pub fn validate(&self) -> Result<ProcessingRequest, RequestError> {
        let input = required(&self.input_blob_url, "inputBlobUrl")?;
        let output = required(&self.output_container_name, "outputContainerName")?;
        let command = required(&self.ffmpeg_command, "ffmpegCommand")?;

        Ok(ProcessingRequest {
            input_blob_url: parse_url(input, "inputBlobUrl")?,
            output_container_url: parse_url(output, "outputContainerName")?,
            command: command.to_string(),
        })
    }
}

/// A structurally valid transcode request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingRequest {
    /// Source object URL
    pub input_blob_url: Url,
    /// Destination container URL (may carry a virtual directory prefix)
    pub output_container_url: Url,
    /// Raw processing directive
    pub command: String,
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, RequestError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RequestError::Missing(field)),
    }
}

fn parse_url(value: &str, field: &'static str) -> Result<Url, RequestError> {
    if value.len() > MAX_URL_LENGTH {
        return Err(RequestError::InvalidUrl {
            field,
            reason: format!("exceeds maximum length of {} characters", MAX_URL_LENGTH),
        });
    }

    let url = Url::parse(value).map_err(|e| RequestError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    if url.host_str().is_none() {
        return Err(RequestError::InvalidUrl {
            field,
            reason: "URL must have a host".to_string(),
        });
    }

    Ok(url)
}
