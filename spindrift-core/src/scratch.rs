//! Per-session scratch directory for in-progress download data.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::descriptor::InfoHash;

/// On-disk home for one session's partial download.
///
/// Fully disposable: everything under it is recreated on the next run,
/// so teardown deletes it recursively.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Default location for a session: a per-info-hash directory under
    /// `base`, or the OS temp dir when no base is configured.
    pub fn for_info_hash(base: Option<&Path>, info_hash: &InfoHash) -> PathBuf {
        let base = base.map_or_else(std::env::temp_dir, Path::to_path_buf);
        base.join(format!("spindrift-{info_hash}"))
    }

    /// Creates the directory (and parents) if absent.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the path cannot be created.
    pub async fn create(path: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&path).await?;
        debug!("Scratch directory ready at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recursively deletes the directory.
    ///
    /// An already-absent directory counts as success.
    ///
    /// # Errors
    ///
    /// Returns any deletion error other than `NotFound`.
    pub async fn remove(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!("Removed scratch directory {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
