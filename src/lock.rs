//! Advisory single-writer lock on the data directory.
//!
//! Generalizes the teacher's pattern of `file.try_lock_exclusive()` on the
//! single log file (see `storage::bitcask::Log::new`) to a directory of
//! segments by locking a dedicated sentinel file instead of a segment file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::{Error, Result};

const SENTINEL_NAME: &str = ".lock";

/// Held for the lifetime of a `Store`. Dropping it releases the lock.
pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(SENTINEL_NAME);
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        file.try_lock_exclusive().map_err(|_| Error::AlreadyLocked { path: path.clone() })?;
        Ok(Self { path, file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            log::warn!("failed to release directory lock {}: {err}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_dir_fails() {
        let dir = tempfile::TempDir::with_prefix("logcask").unwrap();
        let first = DirLock::acquire(dir.path()).unwrap();
        assert!(matches!(DirLock::acquire(dir.path()).unwrap_err(), Error::AlreadyLocked { .. }));
        drop(first);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
