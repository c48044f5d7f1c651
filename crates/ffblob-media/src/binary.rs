//! Locating the FFmpeg binary.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Well-known install locations checked after the working directory.
const FALLBACK_LOCATIONS: &[&str] = &[
    "/home/site/wwwroot/bin/ffmpeg",
    "/usr/bin/ffmpeg",
    "/usr/local/bin/ffmpeg",
];

/// Resolve the ffmpeg binary once at startup.
///
/// An explicitly configured path must be usable; there is no silent fallback
/// from a bad configuration. Otherwise `./bin/ffmpeg`, `PATH` and the
/// well-known locations are searched in order.
pub fn resolve_ffmpeg(configured: Option<&Path>) -> MediaResult<PathBuf> {
    if let Some(path) = configured {
        return if is_executable(path) {
            info!(path = %path.display(), "Using configured ffmpeg");
            Ok(path.to_path_buf())
        } else {
            Err(MediaError::FfmpegNotUsable(path.to_path_buf()))
        };
    }

    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("bin").join("ffmpeg"));
    }
    if let Ok(found) = which::which("ffmpeg") {
        candidates.push(found);
    }
    candidates.extend(FALLBACK_LOCATIONS.iter().map(PathBuf::from));

    for candidate in candidates {
        if is_executable(&candidate) {
            info!(path = %candidate.display(), "Resolved ffmpeg");
            return Ok(candidate);
        }
        debug!(path = %candidate.display(), "ffmpeg candidate not usable");
    }

    Err(MediaError::FfmpegNotFound)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
