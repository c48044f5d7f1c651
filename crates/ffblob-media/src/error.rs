//! Error types for media operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while preparing or running FFmpeg.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg binary not found")]
    FfmpegNotFound,

    #[error("FFmpeg binary is not usable: {0}")]
    FfmpegNotUsable(PathBuf),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Process timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Reasons a processing directive is refused before any process is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("Directive is empty")]
    Empty,

    #[error("Directive is too long")]
    TooLong,

    #[error("Directive has an unterminated quote")]
    UnbalancedQuote,

    #[error("Directive contains forbidden character {0:?}")]
    ShellMetacharacter(char),

    #[error("Directive may not specify an input file (-i)")]
    InputOverride,

    #[error("Directive may not specify an output file: {0:?}")]
    OutputOverride(String),

    #[error("Option {0} is not allowed")]
    ForbiddenOption(String),

    #[error("Filter {0} is not allowed")]
    ForbiddenFilter(String),

    #[error("Directive may not reference remote resources")]
    RemoteReference,

    #[error("Directive may not reference paths outside the working directory: {0:?}")]
    PathReference(String),

    #[error("Directive may not use ffmpeg quoting or escapes: {0:?}")]
    EscapedValue(String),

    #[error("Option {0} is missing its value")]
    MissingValue(String),
}
