// src/store/provenance.rs

//! Provenance records
//!
//! Each blob may accumulate provenance entries in
//! `metadata/<digest>.json`, one per distinct derivation (generation unit,
//! input context digest, pipeline version). Entries are appended, never
//! replaced.

use super::{ContentStore, FileLock, read_json, write_json};
use crate::error::StoreError;
use crate::hash::{ContentHash, HashAlgorithm};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Caller-supplied description of where a blob came from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Provenance {
    /// Id of the generation unit that produced the bytes
    pub source_unit: String,
    /// Digest of the input context, when the caller has one
    pub context_digest: Option<String>,
    pub pipeline_version: String,
    pub extra: BTreeMap<String, String>,
}

impl Provenance {
    pub fn new(source_unit: impl Into<String>) -> Self {
        Self {
            source_unit: source_unit.into(),
            context_digest: None,
            pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_context_digest(mut self, digest: impl Into<String>) -> Self {
        self.context_digest = Some(digest.into());
        self
    }

    pub fn with_pipeline_version(mut self, version: impl Into<String>) -> Self {
        self.pipeline_version = version.into();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A persisted provenance entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: Uuid,
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub source_unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_digest: Option<String>,
    pub pipeline_version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ProvenanceRecord {
    fn same_derivation(&self, provenance: &Provenance) -> bool {
        self.source_unit == provenance.source_unit
            && self.context_digest == provenance.context_digest
            && self.pipeline_version == provenance.pipeline_version
    }
}

impl ContentStore {
    pub(crate) fn provenance_path(&self, hash: &ContentHash) -> PathBuf {
        self.metadata_dir().join(format!("{}.json", hash.digest))
    }

    /// Provenance records of a blob, oldest first
    pub fn provenance(&self, hash: &ContentHash) -> Result<Vec<ProvenanceRecord>, StoreError> {
        let path = self.provenance_path(hash);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    /// Append a provenance record to an existing blob
    pub fn add_provenance(
        &self,
        hash: &ContentHash,
        provenance: &Provenance,
    ) -> Result<ProvenanceRecord, StoreError> {
        if !self.exists(hash) {
            return Err(StoreError::NotFound(hash.to_prefixed_string()));
        }
        let _lock = FileLock::acquire(self.lock_path(hash))?;
        self.append_provenance_locked(hash, provenance)
    }

    /// Append unless an entry for the same derivation exists; caller holds
    /// the hash lock
    pub(crate) fn append_provenance_locked(
        &self,
        hash: &ContentHash,
        provenance: &Provenance,
    ) -> Result<ProvenanceRecord, StoreError> {
        let path = self.provenance_path(hash);
        let mut records = self.provenance(hash)?;

        if let Some(existing) = records.iter().find(|r| r.same_derivation(provenance)) {
            debug!(hash = %hash, source_unit = %provenance.source_unit, "provenance already recorded");
            return Ok(existing.clone());
        }

        let record = ProvenanceRecord {
            id: Uuid::new_v4(),
            hash: hash.digest.clone(),
            algorithm: hash.algorithm,
            source_unit: provenance.source_unit.clone(),
            context_digest: provenance.context_digest.clone(),
            pipeline_version: provenance.pipeline_version.clone(),
            timestamp: Utc::now(),
            extra: provenance.extra.clone(),
        };
        records.push(record.clone());
        write_json(&self.tmp_dir(), &path, &records)?;

        debug!(hash = %hash, source_unit = %record.source_unit, entries = records.len(), "recorded provenance");
        Ok(record)
    }
}
