//! Process-wide run lock.
//!
//! Only one orchestrator process may run jobs at a time. The lock is an
//! OS-level exclusive lock on a file, acquired without blocking and released
//! when the guard is dropped.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Fails with [`Error::AlreadyRunning`] if another process holds the lock.
    pub fn acquire<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired run lock {:?}", path);
                Ok(Self { path, file })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::AlreadyRunning(path)),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::AlreadyRunning(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::debug!("Released run lock {:?}", self.path);
    }
}
