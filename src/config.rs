// src/config.rs

//! Configuration file
//!
//! Every section and key is optional; missing values take the defaults of
//! the component they configure. Unknown keys are rejected so a typo does
//! not silently fall back to a default.
//!
//! ```toml
//! [store]
//! root = "/var/lib/canonstore"
//! compression = "zstd"
//!
//! [gc]
//! max_age_secs = 3600
//!
//! [canonicalize]
//! extra_volatile_attributes = ["w14:paraId"]
//! container_compression = "deflate"
//!
//! [placement]
//! root = "generated"
//! markers = true
//! marker_comment = "//"
//! ```

use crate::canonical::CanonicalizeOptions;
use crate::canonical::cache::DEFAULT_CACHE_ENTRIES;
use crate::container::EntryCompression;
use crate::error::ConfigError;
use crate::hash::{self, HashAlgorithm};
use crate::placement::PlacementOptions;
use crate::store::codec::DEFAULT_ZSTD_LEVEL;
use crate::store::gc::DEFAULT_MAX_AGE;
use crate::store::{CompressionKind, GcOptions, StoreOptions};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "canonstore.toml";

const DEFAULT_DEFLATE_LEVEL: u32 = 6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub gc: GcSection,
    #[serde(default)]
    pub canonicalize: CanonicalizeSection,
    #[serde(default)]
    pub placement: PlacementSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub root: PathBuf,
    pub algorithm: HashAlgorithm,
    pub compression: CompressionKind,
    pub zstd_level: i32,
    pub verify_on_read: bool,
    pub verify_on_dedup: bool,
    pub uri_scheme: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("store"),
            algorithm: HashAlgorithm::Sha256,
            compression: CompressionKind::None,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            verify_on_read: true,
            verify_on_dedup: true,
            uri_scheme: hash::DEFAULT_URI_SCHEME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcSection {
    pub max_age_secs: u64,
    pub dry_run: bool,
}

impl Default for GcSection {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_MAX_AGE.as_secs(),
            dry_run: false,
        }
    }
}

/// Entry compression written into canonical containers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerCompression {
    #[default]
    Stored,
    Deflate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanonicalizeSection {
    /// Added to the built-in volatile element list
    pub extra_volatile_elements: Vec<String>,
    /// Added to the built-in volatile attribute list
    pub extra_volatile_attributes: Vec<String>,
    pub markup_patterns: Vec<String>,
    pub priority_parts: Vec<String>,
    pub container_compression: ContainerCompression,
    pub deflate_level: u32,
    pub passthrough_on_malformed: bool,
    pub cache_entries: usize,
}

impl Default for CanonicalizeSection {
    fn default() -> Self {
        let defaults = CanonicalizeOptions::default();
        Self {
            extra_volatile_elements: Vec::new(),
            extra_volatile_attributes: Vec::new(),
            markup_patterns: defaults
                .markup_patterns
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            priority_parts: defaults.priority_parts,
            container_compression: ContainerCompression::Stored,
            deflate_level: DEFAULT_DEFLATE_LEVEL,
            passthrough_on_malformed: false,
            cache_entries: DEFAULT_CACHE_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementSection {
    pub root: PathBuf,
    pub markers: bool,
    pub marker_comment: String,
    pub fallback_to_end: bool,
    /// Placement records; relative paths are taken from `root`
    pub state_dir: PathBuf,
}

impl Default for PlacementSection {
    fn default() -> Self {
        let defaults = PlacementOptions::default();
        Self {
            root: PathBuf::from("."),
            markers: defaults.markers,
            marker_comment: defaults.marker_prefix,
            fallback_to_end: defaults.fallback_to_end,
            state_dir: defaults.state_dir,
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=22).contains(&self.store.zstd_level) {
            return Err(invalid(
                "store.zstd_level",
                format!("{} is outside 1..=22", self.store.zstd_level),
            ));
        }
        if self.store.uri_scheme.is_empty()
            || !self
                .store
                .uri_scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid(
                "store.uri_scheme",
                format!("{:?} is not a valid URI scheme", self.store.uri_scheme),
            ));
        }
        if self.canonicalize.deflate_level > 9 {
            return Err(invalid(
                "canonicalize.deflate_level",
                format!("{} is outside 0..=9", self.canonicalize.deflate_level),
            ));
        }
        if self.canonicalize.cache_entries == 0 {
            return Err(invalid("canonicalize.cache_entries", "must be at least 1"));
        }
        self.markup_patterns()?;
        if self.placement.marker_comment.trim().is_empty() {
            return Err(invalid("placement.marker_comment", "must not be empty"));
        }
        if self.placement.state_dir.as_os_str().is_empty() {
            return Err(invalid("placement.state_dir", "must not be empty"));
        }
        Ok(())
    }

    fn markup_patterns(&self) -> Result<Vec<Pattern>, ConfigError> {
        self.canonicalize
            .markup_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| invalid("canonicalize.markup_patterns", format!("{p:?}: {e}")))
            })
            .collect()
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            algorithm: self.store.algorithm,
            compression: self.store.compression,
            zstd_level: self.store.zstd_level,
            verify_on_read: self.store.verify_on_read,
            verify_on_dedup: self.store.verify_on_dedup,
            uri_scheme: self.store.uri_scheme.clone(),
        }
    }

    pub fn gc_options(&self) -> GcOptions {
        GcOptions {
            dry_run: self.gc.dry_run,
            max_age: Duration::from_secs(self.gc.max_age_secs),
        }
    }

    pub fn canonicalize_options(&self) -> Result<CanonicalizeOptions, ConfigError> {
        let section = &self.canonicalize;
        let mut options = CanonicalizeOptions::default();
        options
            .volatile
            .elements
            .extend(section.extra_volatile_elements.iter().cloned());
        options
            .volatile
            .attributes
            .extend(section.extra_volatile_attributes.iter().cloned());
        options.markup_patterns = self.markup_patterns()?;
        options.priority_parts = section.priority_parts.clone();
        options.compression = match section.container_compression {
            ContainerCompression::Stored => EntryCompression::Stored,
            ContainerCompression::Deflate => EntryCompression::Deflate(section.deflate_level),
        };
        options.passthrough_on_malformed = section.passthrough_on_malformed;
        Ok(options)
    }

    pub fn placement_options(&self) -> PlacementOptions {
        PlacementOptions {
            markers: self.placement.markers,
            marker_prefix: self.placement.marker_comment.clone(),
            fallback_to_end: self.placement.fallback_to_end,
            state_dir: self.placement.state_dir.clone(),
        }
    }
}
