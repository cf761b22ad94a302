//! Cross-process exclusive lock for file-backed stores.
//!
//! Unix uses `flock(2)` on a sidecar lock file. `flock` locks belong to the
//! open file description, so two handles opened by the same process still
//! exclude each other, but clones of one handle do not. Callers that share a
//! handle between threads must serialize those threads themselves.
//!
//! Other targets get an in-process lock only.

use std::{
    fs::{self, File, OpenOptions},
    path::Path,
    sync::Arc,
};

use crate::error::{StorageError, StorageResult};

/// Handle on a lock file.
#[derive(Debug, Clone)]
pub struct StoreLock {
    file: Arc<File>,
}

/// Holds the exclusive lock until dropped.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: Arc<File>,
}

impl StoreLock {
    /// Opens (creating if needed) the lock file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or file cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| lock_error(&err))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| lock_error(&err))?;
        Ok(Self {
            file: Arc::new(file),
        })
    }

    /// Blocks until the exclusive lock is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS rejects the lock request.
    pub fn lock(&self) -> StorageResult<StoreLockGuard> {
        sys::lock(&self.file, true).map_err(|err| lock_error(&err))?;
        Ok(StoreLockGuard {
            file: Arc::clone(&self.file),
        })
    }

    /// Takes the lock if nobody else holds it.
    ///
    /// # Errors
    ///
    /// Returns an error for OS failures other than contention.
    pub fn try_lock(&self) -> StorageResult<Option<StoreLockGuard>> {
        match sys::lock(&self.file, false) {
            Ok(()) => Ok(Some(StoreLockGuard {
                file: Arc::clone(&self.file),
            })),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(lock_error(&err)),
        }
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        if let Err(err) = sys::unlock(&self.file) {
            tracing::warn!(error = %err, "failed to release store lock");
        }
    }
}

fn lock_error(err: &std::io::Error) -> StorageError {
    StorageError::Lock(err.to_string())
}

#[cfg(unix)]
mod sys {
    use std::{
        fs::File,
        os::{raw::c_int, unix::io::AsRawFd},
    };

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }

    fn call(file: &File, operation: c_int) -> std::io::Result<()> {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let result = unsafe { flock(file.as_raw_fd(), operation) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    pub(super) fn lock(file: &File, blocking: bool) -> std::io::Result<()> {
        let operation = if blocking { LOCK_EX } else { LOCK_EX | LOCK_NB };
        call(file, operation)
    }

    pub(super) fn unlock(file: &File) -> std::io::Result<()> {
        call(file, LOCK_UN)
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;

    pub(super) fn lock(_file: &File, _blocking: bool) -> std::io::Result<()> {
        Ok(())
    }

    pub(super) fn unlock(_file: &File) -> std::io::Result<()> {
        Ok(())
    }
}
