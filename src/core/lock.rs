//! core::lock
//!
//! Exclusive pipeline lock for one workspace.
//!
//! # Invariants
//!
//! - Exactly one pipeline run may be active per repository
//! - A second invocation fails fast with `LockError::Held` (exit code 4)
//! - The lock is released on drop (RAII), on every exit path including
//!   rollback and cancellation
//!
//! # Storage
//!
//! `.commitly/lock` - a zero-length file carrying an OS-level exclusive
//! advisory lock.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Errors from pipeline locking.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another pipeline run already holds the lock.
    #[error("another pipeline run is active for this repository")]
    Held,

    /// Failed to create the lock file or its parent directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),
}

/// An exclusive lock on the pipeline for one workspace.
///
/// Released automatically when dropped, so holding it in the orchestrator
/// scope guarantees release on normal return, error return, and
/// cancellation alike.
#[derive(Debug)]
pub struct PipelineLock {
    path: PathBuf,
    file: Option<File>,
}

impl PipelineLock {
    /// Attempt to acquire the pipeline lock.
    ///
    /// Non-blocking: if another process holds the lock this returns
    /// `LockError::Held` immediately.
    pub fn acquire(lock_path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LockError::CreateFailed(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", lock_path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path: lock_path.to_path_buf(),
                file: Some(file),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(LockError::Held),
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Whether this guard still holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock before the guard goes out of scope.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

impl Drop for PipelineLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> PathBuf {
        dir.path().join(".commitly").join("lock")
    }

    #[test]
    fn acquire_succeeds_and_creates_state_dir() {
        let temp = TempDir::new().unwrap();
        let path = lock_path(&temp);

        let lock = PipelineLock::acquire(&path).expect("acquire");
        assert!(lock.is_held());
        assert!(path.exists());
    }

    #[test]
    fn second_acquire_fails_fast() {
        let temp = TempDir::new().unwrap();
        let path = lock_path(&temp);

        let _lock = PipelineLock::acquire(&path).expect("first acquire");
        let second = PipelineLock::acquire(&path);
        assert!(matches!(second, Err(LockError::Held)));
    }

    #[test]
    fn released_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = lock_path(&temp);

        {
            let lock = PipelineLock::acquire(&path).expect("acquire");
            assert!(lock.is_held());
        }

        let again = PipelineLock::acquire(&path).expect("reacquire after drop");
        assert!(again.is_held());
    }

    #[test]
    fn explicit_release_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = lock_path(&temp);

        let mut lock = PipelineLock::acquire(&path).expect("acquire");
        lock.release();
        lock.release();
        assert!(!lock.is_held());

        let again = PipelineLock::acquire(&path).expect("reacquire");
        assert!(again.is_held());
    }
}
