// src/error.rs

//! Error types for canonstore
//!
//! Every component has its own error enum so callers can match on the
//! typed kind; [`Error`] wraps them all for code that drives several
//! components at once (the batch pipeline, mostly).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while canonicalizing an artifact
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Unsupported part {path}: {reason}")]
    UnsupportedPart { path: String, reason: String },
}

/// Errors produced by the content-addressed store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found in store: {0}")]
    NotFound(String),

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid reference name: {0}")]
    InvalidReference(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Failed to encode or decode record {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors produced while parsing or resolving a placement directive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("Anchor not found in {path}: {anchor:?}")]
    AnchorNotFound { path: PathBuf, anchor: String },
}

/// Errors produced while applying an artifact to a target file
#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("Target {path} is not writable: {source}")]
    TargetUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Placement record {path}: {reason}")]
    Record { path: PathBuf, reason: String },

    #[error(transparent)]
    Directive(#[from] DirectiveError),
}

/// Errors produced while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Crate-wide error wrapping every component error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Directive(#[from] DirectiveError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type defaulting to the crate-wide [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;
