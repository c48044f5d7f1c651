//! Per-request scratch directories.
//!
//! Each request gets a private directory under the scratch root. The directory
//! is removed by [`ScratchSpace::close`] on every exit path, with `Drop` as a
//! backstop if the owning task is cancelled.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

const SCRATCH_PREFIX: &str = "ffblob-";

/// Local paths used by a single processing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// The request's private directory
    pub scratch_dir: PathBuf,
    /// Where the downloaded input is written
    pub input_path: PathBuf,
    /// Where ffmpeg writes its output
    pub output_path: PathBuf,
}

/// A uniquely named, private directory that lives for one request.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchSpace {
    /// Create a fresh directory under `root`, creating `root` if needed.
    pub fn acquire(root: impl AsRef<Path>) -> MediaResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();

        debug!(path = %path.display(), "Acquired scratch space");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Paths for the input and output files, both using `extension`.
    pub fn work_item(&self, extension: &str) -> WorkItem {
        WorkItem {
            scratch_dir: self.path.clone(),
            input_path: self.path.join(format!("input.{}", extension)),
            output_path: self.path.join(format!("output.{}", extension)),
        }
    }

    /// Remove the directory and everything in it.
    ///
    /// Safe to call more than once; a directory that is already gone counts
    /// as released.
    pub fn release(&mut self) -> MediaResult<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        match dir.close() {
            Ok(()) => {
                debug!(path = %self.path.display(), "Released scratch space");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to remove scratch space: {}", e);
                Err(MediaError::Io(e))
            }
        }
    }

    /// Release on the blocking pool so large trees don't stall the runtime.
    pub async fn close(mut self) -> MediaResult<()> {
        tokio::task::spawn_blocking(move || self.release())
            .await
            .map_err(|e| MediaError::internal(format!("scratch cleanup task failed: {}", e)))?
    }
}
