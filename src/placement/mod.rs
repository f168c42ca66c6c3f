// src/placement/mod.rs

//! Placement engine
//!
//! Applies a canonical artifact to a target file under the placement root,
//! as instructed by a [`Directive`]. The order of checks is fixed:
//!
//! 1. `skipIf` against the caller's bindings
//! 2. an explicit `skip` mode
//! 3. `unlessExists` against the target
//! 4. the mode itself: overwrite, concatenate bytes, or splice into the
//!    current text
//!
//! Re-applying the same directive and artifact reports
//! [`PlacementStatus::Unchanged`] instead of writing again, unless the
//! directive sets `force`. For `append` and `prepend` without markers that
//! decision comes from the placement record kept under the state directory.

pub mod directive;
pub mod inject;
pub mod record;
pub mod skip_if;

pub use directive::{Anchor, Directive, OperationMode, split_front_block};
pub use inject::SpliceOptions;
pub use record::{DEFAULT_STATE_DIR, PlacedEntry, PlacementRecord, RecordBook};
pub use skip_if::{Bindings, SkipExpr};

use crate::error::{DirectiveError, PlacementError};
use crate::filesystem::{WriteOptions, safe_join, write_atomic};
use crate::hash;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Permission bits for new targets without `chmod`
pub const DEFAULT_FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone)]
pub struct PlacementOptions {
    /// Wrap spliced regions in begin/end marker lines
    pub markers: bool,
    /// Comment prefix for marker lines
    pub marker_prefix: String,
    /// Inject at the end of the target when an anchor is missing
    pub fallback_to_end: bool,
    /// Placement records and locks; relative paths are taken from the root
    pub state_dir: PathBuf,
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            markers: false,
            marker_prefix: "#".to_string(),
            fallback_to_end: false,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The directive's mode is `skip`
    Directive,
    /// `skipIf` held; carries the expression
    SkipIf(String),
    /// `unlessExists` and the target is present
    TargetExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementStatus {
    Written,
    /// The target already held the result
    Unchanged,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementResult {
    pub target: PathBuf,
    pub mode: OperationMode,
    pub status: PlacementStatus,
    /// Size of the target after the write; 0 unless `Written`
    pub bytes_written: u64,
}

impl PlacementResult {
    pub fn is_written(&self) -> bool {
        self.status == PlacementStatus::Written
    }
}

#[derive(Debug, Clone)]
pub struct PlacementEngine {
    root: PathBuf,
    options: PlacementOptions,
    records: RecordBook,
}

fn unwritable(path: &Path, source: io::Error) -> PlacementError {
    PlacementError::TargetUnwritable {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(unix)]
fn current_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn current_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

/// Current content and permission bits of the target, if it exists
fn read_target(path: &Path) -> Result<Option<(Vec<u8>, Option<u32>)>, PlacementError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => {
            let bytes = fs::read(path).map_err(|e| unwritable(path, e))?;
            Ok(Some((bytes, current_mode(&metadata))))
        }
        Ok(_) => Err(unwritable(
            path,
            io::Error::other("target exists and is not a regular file"),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(unwritable(path, e)),
    }
}

impl PlacementEngine {
    pub fn new(root: impl Into<PathBuf>, options: PlacementOptions) -> Self {
        let root = root.into();
        let records = RecordBook::new(root.join(&options.state_dir));
        Self {
            root,
            options,
            records,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &PlacementOptions {
        &self.options
    }

    pub fn records(&self) -> &RecordBook {
        &self.records
    }

    /// Apply `content` to the directive's `to` target
    pub fn apply(
        &self,
        directive: &Directive,
        content: &[u8],
        bindings: &Bindings,
    ) -> Result<PlacementResult, PlacementError> {
        let to = directive
            .to()
            .ok_or_else(|| DirectiveError::InvalidDirective("directive has no `to` target".to_string()))?;
        self.apply_to(directive, to, content, bindings)
    }

    /// Apply `content` to an explicit target, ignoring the directive's `to`
    pub fn apply_to(
        &self,
        directive: &Directive,
        to: impl AsRef<Path>,
        content: &[u8],
        bindings: &Bindings,
    ) -> Result<PlacementResult, PlacementError> {
        let to = to.as_ref();
        let target = safe_join(&self.root, to)
            .map_err(|e| DirectiveError::InvalidDirective(format!("target {}: {e}", to.display())))?;
        let mode = directive.mode().clone();

        let result = |status: PlacementStatus, bytes_written: u64| PlacementResult {
            target: target.clone(),
            mode: mode.clone(),
            status,
            bytes_written,
        };

        if let Some(expr) = directive.skip_if()
            && expr.evaluate(bindings)
        {
            debug!(target = %target.display(), expression = %expr, "skipIf held, skipping");
            return Ok(result(PlacementStatus::Skipped(SkipReason::SkipIf(expr.to_string())), 0));
        }
        if mode == OperationMode::Skip {
            debug!(target = %target.display(), "directive mode is skip");
            return Ok(result(PlacementStatus::Skipped(SkipReason::Directive), 0));
        }

        let concatenating = matches!(mode, OperationMode::Append | OperationMode::Prepend);
        let relative = target.strip_prefix(&self.root).unwrap_or(&target).to_path_buf();
        // Held until the record is updated
        let _guard = if concatenating {
            Some(self.records.lock(&relative)?)
        } else {
            None
        };

        let existing = read_target(&target)?;
        if directive.unless_exists() && existing.is_some() {
            debug!(target = %target.display(), "target exists, skipping");
            return Ok(result(PlacementStatus::Skipped(SkipReason::TargetExists), 0));
        }

        let (current, current_mode) = match &existing {
            Some((bytes, mode)) => (Some(bytes.as_slice()), *mode),
            None => (None, None),
        };
        let wanted_mode = directive.chmod().or(current_mode).unwrap_or(DEFAULT_FILE_MODE);
        let mode_matches = directive.chmod().is_none_or(|m| current_mode == Some(m));

        let markers = self.options.markers.then_some(self.options.marker_prefix.as_str());
        let updated: Option<Vec<u8>> = match &mode {
            OperationMode::Write => {
                if !directive.force() && current == Some(content) && mode_matches {
                    None
                } else {
                    Some(content.to_vec())
                }
            }
            OperationMode::Append | OperationMode::Prepend => {
                let placed = match current {
                    Some(current) if !directive.force() => {
                        self.already_placed(&relative, current, content, &mode)?
                    }
                    _ => false,
                };
                match (placed, current) {
                    (true, Some(current)) if !mode_matches => Some(current.to_vec()),
                    (true, _) => None,
                    (false, _) => inject::concat(current.unwrap_or_default(), content, &mode, markers),
                }
            }
            splicing => {
                let text = std::str::from_utf8(content).map_err(|_| {
                    DirectiveError::InvalidDirective(format!("{} requires UTF-8 content", splicing.name()))
                })?;
                let target_text = std::str::from_utf8(current.unwrap_or_default()).map_err(|_| {
                    DirectiveError::InvalidDirective(format!(
                        "{} requires a UTF-8 target: {}",
                        splicing.name(),
                        target.display()
                    ))
                })?;
                let options = SpliceOptions {
                    markers,
                    fallback_to_end: self.options.fallback_to_end,
                    force: directive.force(),
                };
                match inject::splice(target_text, text, splicing, options, &target)? {
                    Some(spliced) => Some(spliced.into_bytes()),
                    // Content in place; still honour a changed chmod
                    None if !mode_matches => current.map(<[u8]>::to_vec),
                    None => None,
                }
            }
        };

        let Some(bytes) = updated else {
            debug!(target = %target.display(), mode = %mode, "target already up to date");
            return Ok(result(PlacementStatus::Unchanged, 0));
        };

        let staging = target.parent().unwrap_or(&self.root);
        let write = WriteOptions {
            no_clobber: false,
            mode: Some(wanted_mode),
        };
        write_atomic(staging, &target, &bytes, write).map_err(|e| unwritable(&target, e))?;
        if concatenating {
            self.remember(&relative, content, &mode, &bytes)?;
        }

        info!(
            target = %target.display(),
            mode = %mode,
            bytes = bytes.len(),
            "placed artifact"
        );
        Ok(result(PlacementStatus::Written, bytes.len() as u64))
    }

    /// Whether an earlier append/prepend of `content` is still visible
    fn already_placed(
        &self,
        relative: &Path,
        current: &[u8],
        content: &[u8],
        mode: &OperationMode,
    ) -> Result<bool, PlacementError> {
        if let Some(prefix) = self.options.markers.then_some(self.options.marker_prefix.as_str()) {
            return Ok(inject::has_marked_region(current, content, prefix));
        }
        let record = self.records.load(relative)?;
        let Some(entry) = record.find(mode.name(), &hash::sha256(content)) else {
            return Ok(false);
        };
        Ok(entry.result == hash::sha256(current)
            || match mode {
                OperationMode::Prepend => current.starts_with(content),
                _ => current.ends_with(content),
            })
    }

    fn remember(
        &self,
        relative: &Path,
        content: &[u8],
        mode: &OperationMode,
        written: &[u8],
    ) -> Result<(), PlacementError> {
        let mut record = self.records.load(relative)?;
        record.upsert(PlacedEntry {
            mode: mode.name().to_string(),
            content: hash::sha256(content),
            result: hash::sha256(written),
            timestamp: Utc::now(),
        });
        self.records.save(relative, &record)
    }
}
