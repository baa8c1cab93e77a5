//! Per-video scratch space, removed on every exit path.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;

/// A directory under the scratch root named after the video. Dropping it
/// (success, error, panic or a cancelled future) deletes it recursively.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn create(root: &Path, video_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(video_id)))
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Explicit removal so failures get logged instead of swallowed by Drop.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), "Failed to remove scratch directory: {}", e);
        }
    }
}

fn sanitize(video_id: &str) -> String {
    video_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
