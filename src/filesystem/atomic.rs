// src/filesystem/atomic.rs

//! Staged writes with atomic rename
//!
//! Content is written to a temporary file in a staging directory on the
//! same filesystem, synced, then renamed into place. A reader never sees a
//! partially written file under its final name.
//!
//! Removing leftover staging files is best-effort. Its outcome is reported
//! through [`Cleanup`], separately from the write's own `io::Result`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

/// Outcome of a best-effort cleanup step
#[derive(Debug)]
pub enum Cleanup {
    /// Nothing was left behind
    NotNeeded,
    /// The leftover file was removed
    Removed(PathBuf),
    /// Removal failed; the leftover stays on disk
    Failed { path: PathBuf, error: io::Error },
}

impl Cleanup {
    /// Remove a file, recording rather than propagating failure
    pub fn remove_file(path: &Path) -> Self {
        match fs::remove_file(path) {
            Ok(()) => Cleanup::Removed(path.to_path_buf()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Cleanup::NotNeeded,
            Err(error) => Cleanup::Failed {
                path: path.to_path_buf(),
                error,
            },
        }
    }

    /// Remove a directory if it is empty; a non-empty one is left alone
    pub fn remove_empty_dir(path: &Path) -> Self {
        match fs::remove_dir(path) {
            Ok(()) => Cleanup::Removed(path.to_path_buf()),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty) => {
                Cleanup::NotNeeded
            }
            Err(error) => Cleanup::Failed {
                path: path.to_path_buf(),
                error,
            },
        }
    }

    fn close_temp(file: NamedTempFile) -> Self {
        let path = file.path().to_path_buf();
        match file.close() {
            Ok(()) => Cleanup::Removed(path),
            Err(error) => Cleanup::Failed { path, error },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Cleanup::Failed { .. })
    }

    /// Emit a warning for failed cleanups; returns self for chaining
    pub fn log(self) -> Self {
        if let Cleanup::Failed { path, error } = &self {
            warn!(path = %path.display(), %error, "best-effort cleanup failed");
        }
        self
    }
}

/// What happened to the destination path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The destination did not exist and now holds the new content
    Created,
    /// The destination was replaced
    Replaced,
    /// `no_clobber` was requested and the destination already existed
    AlreadyExists,
}

/// Result of a staged write
#[derive(Debug)]
pub struct StagedWrite {
    pub outcome: WriteOutcome,
    pub cleanup: Cleanup,
}

/// Options for [`write_atomic`]
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Fail over to [`WriteOutcome::AlreadyExists`] instead of replacing
    pub no_clobber: bool,
    /// Unix permission bits applied to the staged file before the rename
    pub mode: Option<u32>,
}

/// Write `content` to `dest` through a temp file in `staging_dir`
///
/// `staging_dir` must be on the same filesystem as `dest` for the rename
/// to be atomic. Parent directories of `dest` are created as needed.
pub fn write_atomic(
    staging_dir: &Path,
    dest: &Path,
    content: &[u8],
    options: WriteOptions,
) -> io::Result<StagedWrite> {
    fs::create_dir_all(staging_dir)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let existed = dest.exists();
    let mut staged = NamedTempFile::new_in(staging_dir)?;
    staged.write_all(content)?;
    staged.as_file().sync_all()?;
    set_mode(staged.path(), options.mode)?;

    let mut retried = false;
    loop {
        let persisted = if options.no_clobber {
            staged.persist_noclobber(dest)
        } else {
            staged.persist(dest)
        };
        match persisted {
            Ok(_) => {
                let outcome = if existed && !options.no_clobber {
                    WriteOutcome::Replaced
                } else {
                    WriteOutcome::Created
                };
                return Ok(StagedWrite {
                    outcome,
                    cleanup: Cleanup::NotNeeded,
                });
            }
            Err(e) if options.no_clobber && e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(StagedWrite {
                    outcome: WriteOutcome::AlreadyExists,
                    cleanup: Cleanup::close_temp(e.file).log(),
                });
            }
            // The parent was pruned as empty between creation and rename
            Err(e) if e.error.kind() == io::ErrorKind::NotFound && !retried => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                staged = e.file;
                retried = true;
            }
            Err(e) => {
                Cleanup::close_temp(e.file).log();
                return Err(e.error);
            }
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join("tmp");
        let dest = temp_dir.path().join("out/file.txt");

        let first = write_atomic(&staging, &dest, b"one", WriteOptions::default()).unwrap();
        assert_eq!(first.outcome, WriteOutcome::Created);
        assert_eq!(fs::read(&dest).unwrap(), b"one");

        let second = write_atomic(&staging, &dest, b"two", WriteOptions::default()).unwrap();
        assert_eq!(second.outcome, WriteOutcome::Replaced);
        assert_eq!(fs::read(&dest).unwrap(), b"two");

        // Nothing left in staging
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn test_write_atomic_no_clobber() {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join("tmp");
        let dest = temp_dir.path().join("file.txt");
        fs::write(&dest, b"original").unwrap();

        let options = WriteOptions {
            no_clobber: true,
            ..Default::default()
        };
        let result = write_atomic(&staging, &dest, b"new", options).unwrap();

        assert_eq!(result.outcome, WriteOutcome::AlreadyExists);
        assert!(!result.cleanup.is_failed());
        assert_eq!(fs::read(&dest).unwrap(), b"original");
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_write_atomic_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("script.sh");
        let options = WriteOptions {
            mode: Some(0o750),
            ..Default::default()
        };
        write_atomic(temp_dir.path(), &dest, b"#!/bin/sh\n", options).unwrap();

        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn test_cleanup_missing_file_not_needed() {
        let temp_dir = TempDir::new().unwrap();
        let cleanup = Cleanup::remove_file(&temp_dir.path().join("absent"));
        assert!(matches!(cleanup, Cleanup::NotNeeded));
    }
}
