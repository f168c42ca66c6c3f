// src/store/gc.rs

//! Reclamation of unreferenced blobs
//!
//! A blob is removed only when it is both unreachable from every
//! reference and older than `max_age`. The age grace period protects blobs
//! that were just stored and are about to be referenced, and blobs whose
//! only reference is created after the collector took its snapshot.
//!
//! Only one collector runs at a time (`gc.lock`). Each removal happens
//! under the blob's hash lock with the age re-checked, so a concurrent
//! store that refreshes the blob wins. Per-object failures are logged and
//! counted; they never abort the sweep.

use super::{ContentStore, FileLock};
use crate::error::StoreError;
use crate::filesystem::Cleanup;
use crate::hash::ContentHash;
use std::collections::HashSet;
use std::fs;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Default grace period for unreferenced blobs
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Report candidates without deleting anything
    pub dry_run: bool,
    /// Unreferenced blobs younger than this are kept
    pub max_age: Duration,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Blobs examined
    pub scanned: usize,
    /// Blobs kept because a reference points at them
    pub reachable: usize,
    /// Blobs deleted (always 0 in dry-run mode)
    pub removed: usize,
    /// Stored size of the deleted blobs
    pub bytes_reclaimed: u64,
    /// Blobs that could not be examined or deleted
    pub failed: usize,
    /// Unreachable blobs old enough to be reclaimed
    pub candidates: Vec<ContentHash>,
    /// Leftover staging files removed
    pub staging_removed: usize,
}

fn older_than(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    now.duration_since(modified)
        .map(|age| age > max_age)
        .unwrap_or(false)
}

impl ContentStore {
    /// Run a collection pass
    ///
    /// Fails with [`StoreError::Lock`] when another collector is running and
    /// with the underlying error when the reference set cannot be read.
    pub fn garbage_collect(&self, options: &GcOptions) -> Result<GcReport, StoreError> {
        let _gc_lock = FileLock::try_acquire(self.gc_lock_path())?
            .ok_or_else(|| StoreError::Lock("another garbage collection is running".to_string()))?;

        // Snapshot of the reachable set
        let mut reachable = HashSet::new();
        for reference in self.list_references(None)? {
            reachable.insert(reference.content_hash()?);
        }
        debug!(references = reachable.len(), "gc reference snapshot taken");

        let now = SystemTime::now();
        let mut report = GcReport::default();

        for hash in self.list_objects()? {
            report.scanned += 1;
            if reachable.contains(&hash) {
                report.reachable += 1;
                continue;
            }

            let stat = match self.stat(&hash) {
                Ok(stat) => stat,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => {
                    warn!(hash = %hash, error = %e, "gc: failed to stat object");
                    report.failed += 1;
                    continue;
                }
            };
            if !older_than(stat.modified, now, options.max_age) {
                continue;
            }

            report.candidates.push(hash.clone());
            if options.dry_run {
                continue;
            }

            match self.reclaim(&hash, options.max_age) {
                Ok(Some(size)) => {
                    report.removed += 1;
                    report.bytes_reclaimed += size;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(hash = %hash, error = %e, "gc: failed to remove object");
                    report.failed += 1;
                }
            }
        }

        if !options.dry_run {
            report.staging_removed = self.sweep_staging(now, options.max_age);
        }

        info!(
            scanned = report.scanned,
            reachable = report.reachable,
            candidates = report.candidates.len(),
            removed = report.removed,
            bytes_reclaimed = report.bytes_reclaimed,
            failed = report.failed,
            dry_run = options.dry_run,
            "garbage collection complete"
        );
        Ok(report)
    }

    /// Remove one blob under its hash lock
    ///
    /// Returns `Ok(None)` when the blob is busy or was refreshed since the
    /// scan.
    fn reclaim(&self, hash: &ContentHash, max_age: Duration) -> Result<Option<u64>, StoreError> {
        let Some(lock) = FileLock::try_acquire(self.lock_path(hash))? else {
            debug!(hash = %hash, "gc: object busy, skipping");
            return Ok(None);
        };

        let stat = match self.stat(hash) {
            Ok(stat) => stat,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !older_than(stat.modified, SystemTime::now(), max_age) {
            debug!(hash = %hash, "gc: object refreshed, keeping");
            return Ok(None);
        }

        fs::remove_file(&stat.path)?;
        Cleanup::remove_file(&self.provenance_path(hash)).log();
        if let Some(shard) = stat.path.parent() {
            Cleanup::remove_empty_dir(shard).log();
        }
        // Unlinked while still held; waiting stores retry on a fresh file
        lock.remove();

        debug!(hash = %hash, size = stat.stored_size, "gc: removed object");
        Ok(Some(stat.stored_size))
    }

    /// Remove staging files left by interrupted writes
    fn sweep_staging(&self, now: SystemTime, max_age: Duration) -> usize {
        let entries = match fs::read_dir(self.tmp_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "gc: cannot read staging directory");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| older_than(modified, now, max_age))
                .unwrap_or(false);
            if stale && matches!(Cleanup::remove_file(&entry.path()).log(), Cleanup::Removed(_)) {
                removed += 1;
            }
        }
        removed
    }
}
