//! Temporary files created while resolving a batch.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Delete one artifact. A file that is already gone counts as deleted;
/// other failures are logged and swallowed.
fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed temporary artifact"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary artifact"),
    }
}

/// Artifacts created by one in-flight batch.
///
/// Dropping the batch deletes everything it tracks. That covers both an
/// error in a later item and cancellation of the resolving future. A batch
/// that completes hands its artifacts over with [`ArtifactBatch::into_cleanup`].
#[derive(Debug, Default)]
pub struct ArtifactBatch {
    artifacts: Vec<PathBuf>,
}

impl ArtifactBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a path. Call before the file is written so a partial write is
    /// rolled back too.
    pub fn track(&mut self, path: PathBuf) {
        self.artifacts.push(path);
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Finish the batch; the artifacts now belong to the returned handle.
    pub fn into_cleanup(mut self) -> CleanupHandle {
        CleanupHandle {
            artifacts: std::mem::take(&mut self.artifacts),
        }
    }
}

impl Drop for ArtifactBatch {
    fn drop(&mut self) {
        if self.artifacts.is_empty() {
            return;
        }
        warn!(count = self.artifacts.len(), "Rolling back temporary artifacts");
        for path in &self.artifacts {
            remove_artifact(path);
        }
    }
}

/// Deletes the artifacts of a resolved batch once they have been published.
///
/// Unlike [`ArtifactBatch`], dropping the handle leaves the files in place.
#[derive(Debug, Default, Clone)]
pub struct CleanupHandle {
    artifacts: Vec<PathBuf>,
}

impl CleanupHandle {
    /// Paths this handle will delete.
    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Delete every artifact. Safe to call repeatedly; never fails.
    pub fn cleanup(&self) {
        for path in &self.artifacts {
            remove_artifact(path);
        }
    }
}

/// A process-local scratch file, deleted when dropped.
#[derive(Debug)]
pub(crate) struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        remove_artifact(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_dropped_batch_rolls_back() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a");
        let b = touch(&dir, "b");

        let mut batch = ArtifactBatch::new();
        batch.track(a.clone());
        batch.track(b.clone());
        batch.track(dir.path().join("never-written"));
        drop(batch);

        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn test_finished_batch_keeps_files_until_cleanup() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a");

        let mut batch = ArtifactBatch::new();
        batch.track(a.clone());
        let handle = batch.into_cleanup();
        assert!(a.exists());
        assert_eq!(handle.artifacts(), &[a.clone()]);

        handle.cleanup();
        assert!(!a.exists());
        handle.cleanup();
    }

    #[test]
    fn test_cleanup_tolerates_manual_deletion() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a");
        let b = touch(&dir, "b");

        let mut batch = ArtifactBatch::new();
        batch.track(a.clone());
        batch.track(b.clone());
        let handle = batch.into_cleanup();

        std::fs::remove_file(&a).unwrap();
        handle.cleanup();
        assert!(!b.exists());
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "x.part");

        let scratch = ScratchFile::new(path.clone());
        assert_eq!(scratch.path(), path.as_path());
        drop(scratch);
        assert!(!path.exists());
    }
}
