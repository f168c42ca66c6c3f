// src/placement/record.rs

//! Placement records
//!
//! Appending and prepending concatenate raw bytes, so there is no line
//! structure to re-find on a second run. Instead the engine remembers what
//! it placed: one JSON file per target under the state directory, named by
//! the SHA-256 of the target's path relative to the placement root.
//!
//! An entry holds the mode, the digest of the placed content and the
//! digest of the whole target right after the write. A later apply of the
//! same content is a no-op only when an entry exists and the target still
//! shows it (unchanged since, or still ending/starting with the content).

use crate::error::PlacementError;
use crate::filesystem::{WriteOptions, write_atomic};
use crate::hash;
use crate::store::FileLock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default state directory, relative to the placement root
pub const DEFAULT_STATE_DIR: &str = ".canonstore";

const RECORDS_DIR: &str = "placements";
const LOCKS_DIR: &str = "locks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedEntry {
    /// Mode name, `append` or `prepend`
    pub mode: String,
    /// SHA-256 of the placed content
    pub content: String,
    /// SHA-256 of the target after the write
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything placed into one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub target: String,
    pub entries: Vec<PlacedEntry>,
}

impl PlacementRecord {
    pub fn find(&self, mode: &str, content: &str) -> Option<&PlacedEntry> {
        self.entries
            .iter()
            .find(|e| e.mode == mode && e.content == content)
    }

    /// Record a placement, replacing an earlier one of the same content
    pub fn upsert(&mut self, entry: PlacedEntry) {
        self.entries
            .retain(|e| !(e.mode == entry.mode && e.content == entry.content));
        self.entries.push(entry);
    }
}

fn record_error(path: &Path, reason: impl ToString) -> PlacementError {
    PlacementError::Record {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Record files under one state directory
#[derive(Debug, Clone)]
pub struct RecordBook {
    dir: PathBuf,
}

impl RecordBook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key(target: &Path) -> String {
        hash::sha256(target.to_string_lossy().as_bytes())
    }

    /// Record file for a target path relative to the placement root
    pub fn record_path(&self, target: &Path) -> PathBuf {
        self.dir
            .join(RECORDS_DIR)
            .join(format!("{}.json", Self::key(target)))
    }

    /// Serialize read-modify-write of one target
    pub fn lock(&self, target: &Path) -> Result<FileLock, PlacementError> {
        let path = self.dir.join(LOCKS_DIR).join(format!("{}.lock", Self::key(target)));
        FileLock::acquire(&path).map_err(|e| record_error(&path, e))
    }

    pub fn load(&self, target: &Path) -> Result<PlacementRecord, PlacementError> {
        let path = self.record_path(target);
        match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| record_error(&path, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PlacementRecord {
                target: target.to_string_lossy().into_owned(),
                entries: Vec::new(),
            }),
            Err(e) => Err(record_error(&path, e)),
        }
    }

    pub fn save(&self, target: &Path, record: &PlacementRecord) -> Result<(), PlacementError> {
        let path = self.record_path(target);
        let json = serde_json::to_vec_pretty(record).map_err(|e| record_error(&path, e))?;
        let staging = self.dir.join(RECORDS_DIR);
        write_atomic(&staging, &path, &json, WriteOptions::default()).map_err(|e| record_error(&path, e))?;
        Ok(())
    }
}
