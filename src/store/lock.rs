// src/store/lock.rs

//! Advisory file locks for the store
//!
//! - **Hash locks**: `locks/<digest>.lock`, held around the dedup
//!   check-then-write of one object and while the collector removes it
//! - **Collector lock**: `gc.lock`, held for a whole collection pass so
//!   only one collector runs at a time
//!
//! Locks use `flock(LOCK_EX)` through `fs2`, so they exclude other threads
//! of this process as well as other processes. They are released when the
//! guard is dropped.
//!
//! A holder may unlink its lock file with [`FileLock::remove`]. Waiters
//! that were blocked on the unlinked file notice after locking that the
//! path no longer names their file and start over on a fresh one.

use crate::error::StoreError;
use crate::filesystem::Cleanup;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| StoreError::Lock(format!("failed to open {}: {}", path.display(), e)))
}

/// Whether `path` still names the file we hold a lock on
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

fn check_linked(file: &File, path: &Path) -> Result<bool, StoreError> {
    let linked = still_linked(file, path)
        .map_err(|e| StoreError::Lock(format!("failed to check {}: {}", path.display(), e)))?;
    if !linked {
        trace!(path = %path.display(), "lock file was removed by its holder, retrying");
    }
    Ok(linked)
}

impl FileLock {
    /// Acquire the lock, blocking until it is available
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        loop {
            let file = open_lock_file(&path)?;
            file.lock_exclusive()
                .map_err(|e| StoreError::Lock(format!("failed to lock {}: {}", path.display(), e)))?;
            if check_linked(&file, &path)? {
                trace!(path = %path.display(), "acquired lock");
                return Ok(Self { file, path });
            }
        }
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, StoreError> {
        let path = path.as_ref().to_path_buf();
        loop {
            let file = open_lock_file(&path)?;
            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(StoreError::Lock(format!(
                        "failed to try-lock {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
            if check_linked(&file, &path)? {
                trace!(path = %path.display(), "acquired lock");
                return Ok(Some(Self { file, path }));
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlink the lock file, then release the lock
    pub fn remove(self) -> Cleanup {
        let cleanup = Cleanup::remove_file(&self.path).log();
        drop(self);
        cleanup
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        trace!(path = %self.path.display(), "released lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_try_acquire_contended() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locks/abc.lock");

        let held = FileLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(FileLock::try_acquire(&path).unwrap().is_none());

        drop(held);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_remove_while_contended() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locks/abc.lock");
        let held = FileLock::acquire(&path).unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| FileLock::acquire(&path).unwrap());
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(matches!(held.remove(), Cleanup::Removed(_)));

            // The waiter ends up on a fresh file that still excludes others
            let lock = waiter.join().unwrap();
            assert!(path.exists());
            assert!(FileLock::try_acquire(&path).unwrap().is_none());
            drop(lock);
        });

        let last = FileLock::try_acquire(&path).unwrap().unwrap();
        assert!(matches!(last.remove(), Cleanup::Removed(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_lock_excludes_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.lock");
        let inside = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _lock = FileLock::acquire(&path).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
    }
}
