// src/store/refs.rs

//! Named references
//!
//! A reference is a mutable, human-meaningful name (e.g.
//! `processed/<input-hash>`) pointing at a blob. Each one is a small JSON
//! record under `refs/<name>`, rewritten atomically when repointed.

use super::{ContentStore, read_json, write_json};
use crate::error::StoreError;
use crate::filesystem::normalize_reference_name;
use crate::hash::{ContentHash, HashAlgorithm};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};
use walkdir::WalkDir;

/// A persisted reference record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Reference {
    /// Target of the reference as a validated hash
    pub fn content_hash(&self) -> Result<ContentHash, StoreError> {
        ContentHash::new(self.algorithm, self.hash.as_str())
            .map_err(|e| StoreError::InvalidHash(format!("reference {}: {}", self.name, e)))
    }
}

impl ContentStore {
    fn reference_path(&self, name: &str) -> Result<(String, PathBuf), StoreError> {
        let normalized = normalize_reference_name(name)
            .map_err(|e| StoreError::InvalidReference(format!("{name}: {e}")))?;
        let path = self.refs_dir().join(&normalized);
        Ok((normalized, path))
    }

    /// Create or repoint a reference
    ///
    /// The target blob must exist.
    pub fn create_reference(
        &self,
        name: &str,
        hash: &ContentHash,
        metadata: BTreeMap<String, String>,
    ) -> Result<Reference, StoreError> {
        let (name, path) = self.reference_path(name)?;
        if !self.exists(hash) {
            return Err(StoreError::NotFound(hash.to_prefixed_string()));
        }

        let reference = Reference {
            name,
            hash: hash.digest.clone(),
            algorithm: hash.algorithm,
            timestamp: Utc::now(),
            metadata,
        };
        write_json(&self.tmp_dir(), &path, &reference)?;

        debug!(reference = %reference.name, hash = %hash, "updated reference");
        Ok(reference)
    }

    /// Look up a reference by name
    pub fn resolve_reference(&self, name: &str) -> Result<Reference, StoreError> {
        let (normalized, path) = self.reference_path(name)?;
        if !path.is_file() {
            return Err(StoreError::ReferenceNotFound(normalized));
        }
        read_json(&path)
    }

    /// Resolve a reference and retrieve the blob it points to
    pub fn retrieve_reference(&self, name: &str) -> Result<super::Blob, StoreError> {
        let reference = self.resolve_reference(name)?;
        self.retrieve(&reference.content_hash()?)
    }

    /// Delete a reference; returns whether it existed
    pub fn delete_reference(&self, name: &str) -> Result<bool, StoreError> {
        let (normalized, path) = self.reference_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(reference = %normalized, "deleted reference");
                // Leave no empty namespace directories behind
                let refs_dir = self.refs_dir();
                let mut dir = path.parent().map(|p| p.to_path_buf());
                while let Some(d) = dir {
                    if d == refs_dir || fs::remove_dir(&d).is_err() {
                        break;
                    }
                    dir = d.parent().map(|p| p.to_path_buf());
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All references, optionally limited to a name prefix, sorted by name
    ///
    /// An unreadable reference record is an error: callers such as the
    /// collector must not act on a partial view.
    pub fn list_references(&self, prefix: Option<&str>) -> Result<Vec<Reference>, StoreError> {
        let refs_dir = self.refs_dir();
        let mut references = Vec::new();
        for entry in WalkDir::new(&refs_dir).min_depth(1) {
            let entry = entry.map_err(|e| StoreError::Io(io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&refs_dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if name.split('/').any(|segment| segment.starts_with('.')) {
                debug!(path = %entry.path().display(), "skipping non-reference file");
                continue;
            }
            if prefix.is_some_and(|p| !name.starts_with(p)) {
                continue;
            }
            references.push(read_json::<Reference>(entry.path())?);
        }
        references.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(references)
    }
}
