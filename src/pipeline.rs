// src/pipeline.rs

//! Batch processing of generation units
//!
//! Each unit goes through the same steps:
//!
//! 1. parse its directive block (before anything is written)
//! 2. canonicalize the raw artifact
//! 3. store the canonical bytes with a provenance record
//! 4. point `processed/<raw-input-digest>` at the stored blob
//! 5. place the artifact, when the unit has a directive and the pipeline
//!    has a placement engine
//!
//! Units are independent. A batch runs them on the rayon pool, each worker
//! with its own part cache, and one unit's failure never stops the others.

use crate::canonical::{CanonicalCache, Canonicalized, Canonicalizer, RawArtifact};
use crate::canonical::cache::DEFAULT_CACHE_ENTRIES;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::placement::{Bindings, Directive, PlacementEngine, PlacementResult};
use crate::store::{ContentStore, Provenance};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Reference namespace for processed inputs
pub const PROCESSED_PREFIX: &str = "processed";

/// One artifact handed over by the generation step
#[derive(Debug, Clone)]
pub struct GenerationUnit {
    /// Identifier recorded as the provenance source unit
    pub id: String,
    pub raw: RawArtifact,
    /// Front block text, fenced or bare
    pub directive_block: Option<String>,
    pub bindings: Bindings,
    /// Digest of the context the unit was generated from
    pub context_digest: Option<String>,
}

impl GenerationUnit {
    pub fn new(id: impl Into<String>, raw: RawArtifact) -> Self {
        Self {
            id: id.into(),
            raw,
            directive_block: None,
            bindings: Bindings::new(),
            context_digest: None,
        }
    }

    pub fn with_directive(mut self, block: impl Into<String>) -> Self {
        self.directive_block = Some(block.into());
        self
    }

    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_context_digest(mut self, digest: impl Into<String>) -> Self {
        self.context_digest = Some(digest.into());
        self
    }
}

/// What happened to a unit that went through successfully
#[derive(Debug, Clone)]
pub struct ProcessedUnit {
    /// Hash of the raw input bytes
    pub input_hash: ContentHash,
    /// Hash of the stored (canonical) bytes
    pub hash: ContentHash,
    /// The blob was already in the store
    pub existed: bool,
    /// The raw bytes were stored uncanonicalized
    pub passthrough: bool,
    /// Name of the `processed/...` reference
    pub reference: String,
    pub placement: Option<PlacementResult>,
}

#[derive(Debug)]
pub struct ItemOutcome {
    pub id: String,
    pub result: Result<ProcessedUnit>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Per-unit outcomes in input order
    pub items: Vec<ItemOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Outcomes that failed
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.items
            .iter()
            .filter_map(|item| item.result.as_ref().err().map(|e| (item.id.as_str(), e)))
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    canonicalizer: Canonicalizer,
    store: ContentStore,
    placement: Option<PlacementEngine>,
    cache_entries: usize,
}

impl Pipeline {
    pub fn new(canonicalizer: Canonicalizer, store: ContentStore) -> Self {
        Self {
            canonicalizer,
            store,
            placement: None,
            cache_entries: DEFAULT_CACHE_ENTRIES,
        }
    }

    pub fn with_placement(mut self, engine: PlacementEngine) -> Self {
        self.placement = Some(engine);
        self
    }

    /// Capacity of each worker's part cache
    pub fn with_cache_entries(mut self, entries: usize) -> Self {
        self.cache_entries = entries;
        self
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn placement(&self) -> Option<&PlacementEngine> {
        self.placement.as_ref()
    }

    /// Process a single unit
    pub fn process(&self, unit: GenerationUnit, cache: Option<&mut CanonicalCache>) -> Result<ProcessedUnit> {
        let directive = unit
            .directive_block
            .as_deref()
            .map(Directive::parse)
            .transpose()?;

        let input_hash = unit.raw.hash(self.store.algorithm());
        let canonical = self.canonicalizer.canonicalize_or_passthrough(unit.raw, cache)?;
        let passthrough = canonical.is_passthrough();
        let bytes = match &canonical {
            Canonicalized::Canonical(artifact) => artifact.bytes(),
            Canonicalized::Passthrough { raw, .. } => raw.bytes.as_slice(),
        };

        let mut provenance = Provenance::new(&unit.id);
        if let Some(digest) = &unit.context_digest {
            provenance = provenance.with_context_digest(digest);
        }
        if passthrough {
            provenance = provenance.with_extra("passthrough", "true");
        }
        let (stored, _record) = self.store.store_with_provenance(bytes, &provenance)?;

        let reference = format!("{PROCESSED_PREFIX}/{}", input_hash.digest);
        let mut metadata = BTreeMap::new();
        metadata.insert("unit".to_string(), unit.id.clone());
        self.store.create_reference(&reference, &stored.hash, metadata)?;

        let placement = match (&directive, &self.placement) {
            (Some(directive), Some(engine)) => Some(engine.apply(directive, bytes, &unit.bindings)?),
            (Some(_), None) => {
                warn!(unit = %unit.id, "unit has a directive but no placement engine is configured");
                None
            }
            (None, _) => None,
        };

        debug!(
            unit = %unit.id,
            input = %input_hash,
            hash = %stored.hash,
            existed = stored.existed,
            passthrough,
            "processed unit"
        );
        Ok(ProcessedUnit {
            input_hash,
            hash: stored.hash,
            existed: stored.existed,
            passthrough,
            reference,
            placement,
        })
    }

    /// Process units in parallel
    pub fn run_batch(&self, units: Vec<GenerationUnit>) -> BatchReport {
        let total = units.len();
        let items: Vec<ItemOutcome> = units
            .into_par_iter()
            .map_init(
                || CanonicalCache::with_max_entries(self.cache_entries),
                |cache, unit| {
                    let id = unit.id.clone();
                    let result = self.process(unit, Some(cache));
                    if let Err(e) = &result {
                        warn!(unit = %id, error = %e, "unit failed");
                    }
                    ItemOutcome { id, result }
                },
            )
            .collect();

        let succeeded = items.iter().filter(|item| item.result.is_ok()).count();
        let failed = total - succeeded;
        info!(total, succeeded, failed, "batch complete");

        BatchReport {
            items,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerKind;
    use crate::placement::{PlacementOptions, PlacementStatus};
    use crate::store::StoreOptions;
    use std::fs;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> Pipeline {
        let store = ContentStore::open(dir.path().join("store"), StoreOptions::default()).unwrap();
        Pipeline::new(Canonicalizer::default(), store)
            .with_placement(PlacementEngine::new(dir.path().join("out"), PlacementOptions::default()))
    }

    fn text(id: &str, body: &str) -> GenerationUnit {
        GenerationUnit::new(id, RawArtifact::new(body.as_bytes().to_vec(), ContainerKind::FlatText))
    }

    #[test]
    fn test_process_stores_references_and_places() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(&temp_dir);
        let unit = text("unit-1", "hello   \r\nworld")
            .with_directive("to: greeting.txt")
            .with_context_digest("ctx-1");
        let input_hash = unit.raw.hash(pipeline.store().algorithm());

        let processed = pipeline.process(unit, None).unwrap();
        assert!(!processed.existed);
        assert_eq!(processed.reference, format!("processed/{}", input_hash.digest));

        let blob = pipeline.store().retrieve(&processed.hash).unwrap();
        assert_eq!(blob.bytes, b"hello\nworld\n");
        let reference = pipeline.store().resolve_reference(&processed.reference).unwrap();
        assert_eq!(reference.content_hash().unwrap(), processed.hash);
        assert_eq!(reference.metadata["unit"], "unit-1");

        let records = pipeline.store().provenance(&processed.hash).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_unit, "unit-1");
        assert_eq!(records[0].context_digest.as_deref(), Some("ctx-1"));

        let placement = processed.placement.unwrap();
        assert_eq!(placement.status, PlacementStatus::Written);
        assert_eq!(
            fs::read(temp_dir.path().join("out/greeting.txt")).unwrap(),
            b"hello\nworld\n"
        );
    }

    #[test]
    fn test_bad_directive_fails_before_storing() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(&temp_dir);
        let unit = text("bad", "x").with_directive("append: true\nprepend: true");

        let err = pipeline.process(unit, None).unwrap_err();
        assert!(matches!(err, Error::Directive(_)));
        assert!(pipeline.store().list_objects().unwrap().is_empty());
    }

    #[test]
    fn test_batch_isolates_failures() {
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(&temp_dir);
        let units = vec![
            text("a", "same\n"),
            text("b", "same   \n"),
            text("c", "x").with_directive("lineAt: 0"),
            text("d", "other\n"),
        ];

        let report = pipeline.run_batch(units);
        assert_eq!(report.items.len(), 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures().map(|(id, _)| id).collect::<Vec<_>>(), vec!["c"]);
        let ids: Vec<_> = report.items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        // "a" and "b" canonicalize to the same blob
        assert_eq!(pipeline.store().list_objects().unwrap().len(), 2);
        assert_eq!(pipeline.store().list_references(Some("processed/")).unwrap().len(), 3);
    }
}
