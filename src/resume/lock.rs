//! Exclusive run lock for a progress file
//!
//! Two runs writing the same progress file would silently drop each other's
//! results, so a run holds an advisory lock on `<progress>.run.lock` for
//! its whole duration. The per-save lock (`<progress>.lock`) is a separate
//! file, so saves inside a locked run never contend with the run lock.

use super::state::ResumeError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Advisory lock guarding one progress file for one run
pub struct RunLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Lock file path for a progress file
    pub fn lock_path(progress_path: &Path) -> PathBuf {
        progress_path.with_extension("run.lock")
    }

    /// Open (or create) the lock file without locking it
    pub fn open(progress_path: &Path) -> Result<Self, ResumeError> {
        let path = Self::lock_path(progress_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        Ok(Self {
            lock: RwLock::new(file),
            path,
        })
    }

    /// Take the lock without blocking
    ///
    /// The lock is held until the returned guard is dropped.
    pub fn try_exclusive(&mut self) -> Result<RwLockWriteGuard<'_, File>, ResumeError> {
        let path = self.path.display().to_string();
        self.lock.try_write().map_err(|e| {
            ResumeError::LockError(format!(
                "another run is using this progress file ({path}): {e}"
            ))
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_run_is_refused() {
        let dir = TempDir::new().unwrap();
        let progress = dir.path().join("progress.json");

        let mut first = RunLock::open(&progress).unwrap();
        let guard = first.try_exclusive().unwrap();

        let mut second = RunLock::open(&progress).unwrap();
        assert!(matches!(second.try_exclusive(), Err(ResumeError::LockError(_))));

        drop(guard);
        assert!(second.try_exclusive().is_ok());
    }

    #[test]
    fn test_lock_path_is_separate_from_save_lock() {
        let progress = Path::new("/tmp/outlet_analysis_progress.json");
        assert_eq!(
            RunLock::lock_path(progress),
            Path::new("/tmp/outlet_analysis_progress.run.lock")
        );
        assert_ne!(RunLock::lock_path(progress), progress.with_extension("lock"));
    }
}
