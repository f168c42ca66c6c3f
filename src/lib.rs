// src/lib.rs

//! Canonstore
//!
//! Reproducible handling of generated documents: canonicalize them, keep
//! them in a content-addressed store, check two of them for equivalence,
//! and apply them to target files idempotently.
//!
//! # Architecture
//!
//! - Canonicalization: compound (ZIP/XML) documents and flat text are
//!   normalized so identical content always has identical bytes
//! - Content addressing: blobs are stored once under their hash, with
//!   named references, provenance records and age-gated GC
//! - Verification: byte-level and semantic comparison of artifacts
//! - Placement: directive-driven write/append/prepend/inject with
//!   re-application detection
//! - Pipeline: the steps above for batches of generation units

pub mod canonical;
pub mod config;
pub mod container;
mod error;
pub mod filesystem;
pub mod hash;
pub mod pipeline;
pub mod placement;
pub mod store;
pub mod verify;

pub use canonical::{
    CanonicalArtifact, CanonicalCache, CanonicalizeOptions, Canonicalized, Canonicalizer, RawArtifact,
};
pub use config::{Config, DEFAULT_CONFIG_PATH};
pub use container::ContainerKind;
pub use error::{
    CanonicalizationError, ConfigError, DirectiveError, Error, PlacementError, Result, StoreError,
};
pub use hash::{ContentHash, HashAlgorithm, Hasher};
pub use pipeline::{BatchReport, GenerationUnit, ItemOutcome, Pipeline, ProcessedUnit};
pub use placement::{
    Anchor, Bindings, Directive, OperationMode, PlacementEngine, PlacementOptions, PlacementResult,
    PlacementStatus, SkipReason,
};
pub use store::{
    Blob, ContentStore, GcOptions, GcReport, Provenance, ProvenanceRecord, Reference, StoreOptions,
    StoreResult,
};
pub use verify::{EquivalenceReport, EquivalenceVerifier, SemanticReport};
