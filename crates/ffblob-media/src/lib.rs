//! FFmpeg execution for ffblob.
//!
//! This crate provides:
//! - Directive vetting and type-safe FFmpeg argument building
//! - A process runner with bounded output capture and process-group timeouts
//! - Per-request scratch directories with guaranteed cleanup
//! - FFmpeg binary resolution

pub mod binary;
pub mod command;
pub mod error;
pub mod runner;
pub mod scratch;

pub use binary::resolve_ffmpeg;
pub use command::{Directive, FfmpegCommand};
pub use error::{DirectiveError, MediaError, MediaResult};
pub use runner::{ProcessOutcome, ProcessRunner, TailBuffer};
pub use scratch::{ScratchSpace, WorkItem};
