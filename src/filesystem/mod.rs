// src/filesystem/mod.rs

//! Filesystem helpers shared by the store and the placement engine
//!
//! - Path sanitization for untrusted reference names and targets
//! - Staged writes with atomic rename, and best-effort cleanup reporting

pub mod atomic;
pub mod path;

pub use atomic::{Cleanup, StagedWrite, WriteOptions, WriteOutcome, write_atomic};
pub use path::{PathError, normalize_reference_name, safe_join, sanitize_path};
