// src/canonical/mod.rs

//! Canonicalizer
//!
//! Turns a [`RawArtifact`] into a [`CanonicalArtifact`] whose bytes depend
//! only on the logical content of the document:
//!
//! - compound containers are unpacked, every markup part is normalized
//!   (see [`markup`]), parts are re-ordered by a fixed policy and the
//!   container is re-packed with fixed per-entry metadata
//! - flat text has its line endings and trailing whitespace normalized,
//!   or goes through the markup normalizer when it is markup
//!
//! Canonicalization is idempotent: feeding a canonical artifact back in
//! yields the same bytes.

pub mod cache;
pub mod markup;
pub mod ordering;

pub use cache::{CacheStats, CanonicalCache};
pub use markup::{ListKind, VolatileRules};
pub use ordering::PartClass;

use crate::container::{self, ContainerKind, EntryCompression, Part, Parts};
use crate::error::CanonicalizationError;
use crate::hash::{self, ContentHash, HashAlgorithm};
use glob::Pattern;
use tracing::{debug, warn};

const BOM: char = '\u{feff}';

/// An uncanonicalized artifact as produced by a generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub bytes: Vec<u8>,
    pub kind: ContainerKind,
}

impl RawArtifact {
    pub fn new(bytes: impl Into<Vec<u8>>, kind: ContainerKind) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
        }
    }

    /// Build an artifact, detecting the kind from magic bytes
    pub fn detect(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let kind = ContainerKind::detect(&bytes);
        Self { bytes, kind }
    }

    /// Hash of the raw (uncanonicalized) bytes
    pub fn hash(&self, algorithm: HashAlgorithm) -> ContentHash {
        hash::hash_bytes(algorithm, &self.bytes)
    }
}

/// Bytes in canonical form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalArtifact {
    kind: ContainerKind,
    bytes: Vec<u8>,
}

impl CanonicalArtifact {
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> ContentHash {
        hash::hash_bytes(algorithm, &self.bytes)
    }

    /// Wrap bytes read back from the store, which only holds canonical forms
    pub(crate) fn from_stored(bytes: Vec<u8>) -> Self {
        Self {
            kind: ContainerKind::detect(&bytes),
            bytes,
        }
    }

    /// Treat the canonical bytes as raw input again
    pub fn into_raw(self) -> RawArtifact {
        RawArtifact {
            bytes: self.bytes,
            kind: self.kind,
        }
    }
}

/// Outcome of [`Canonicalizer::canonicalize_or_passthrough`]
#[derive(Debug)]
pub enum Canonicalized {
    Canonical(CanonicalArtifact),
    /// The raw bytes were kept because the container could not be unpacked
    Passthrough {
        raw: RawArtifact,
        reason: CanonicalizationError,
    },
}

impl Canonicalized {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Canonical(artifact) => artifact.bytes(),
            Self::Passthrough { raw, .. } => &raw.bytes,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough { .. })
    }
}

/// Canonicalization options
#[derive(Debug, Clone)]
pub struct CanonicalizeOptions {
    pub volatile: VolatileRules,
    /// Parts matching any of these are normalized as markup
    pub markup_patterns: Vec<Pattern>,
    /// Paths packed first, in this order
    pub priority_parts: Vec<String>,
    pub compression: EntryCompression,
    /// Allow [`Canonicalizer::canonicalize_or_passthrough`] to keep raw bytes
    pub passthrough_on_malformed: bool,
}

impl Default for CanonicalizeOptions {
    fn default() -> Self {
        Self {
            volatile: VolatileRules::default(),
            markup_patterns: ordering::DEFAULT_MARKUP_PATTERNS
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect(),
            priority_parts: ordering::DEFAULT_PRIORITY_PARTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            compression: EntryCompression::Stored,
            passthrough_on_malformed: false,
        }
    }
}

impl CanonicalizeOptions {
    /// Stable digest of everything that affects normalized part bytes
    fn fingerprint(&self) -> String {
        let mut desc = String::new();
        for name in &self.volatile.elements {
            desc.push_str("e:");
            desc.push_str(name);
            desc.push('\n');
        }
        for name in &self.volatile.attributes {
            desc.push_str("a:");
            desc.push_str(name);
            desc.push('\n');
        }
        for prefix in &self.volatile.attribute_prefixes {
            desc.push_str("p:");
            desc.push_str(prefix);
            desc.push('\n');
        }
        for pattern in &self.markup_patterns {
            desc.push_str("g:");
            desc.push_str(pattern.as_str());
            desc.push('\n');
        }
        hash::xxh128(desc.as_bytes())
    }
}

/// Produces canonical artifacts
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    options: CanonicalizeOptions,
    fingerprint: String,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(CanonicalizeOptions::default())
    }
}

impl Canonicalizer {
    pub fn new(options: CanonicalizeOptions) -> Self {
        let fingerprint = options.fingerprint();
        Self {
            options,
            fingerprint,
        }
    }

    pub fn options(&self) -> &CanonicalizeOptions {
        &self.options
    }

    /// Canonicalize an artifact
    ///
    /// Errors are always surfaced; use
    /// [`canonicalize_or_passthrough`](Self::canonicalize_or_passthrough)
    /// to opt into keeping the raw bytes of a malformed container.
    pub fn canonicalize(
        &self,
        raw: RawArtifact,
        mut cache: Option<&mut CanonicalCache>,
    ) -> Result<CanonicalArtifact, CanonicalizationError> {
        if let Some(cache) = cache.as_deref_mut() {
            cache.bind(&self.fingerprint);
        }

        let bytes = match raw.kind {
            ContainerKind::CompoundZip => {
                let parts = container::unpack(raw.kind, &raw.bytes)?;
                let part_count = parts.len();
                let mut normalized = Vec::with_capacity(part_count);
                for part in parts.into_vec() {
                    let data = self.normalize_part(&part.path, part.data, cache.as_deref_mut());
                    normalized.push(Part {
                        path: part.path,
                        data,
                    });
                }
                let ordered = ordering::canonical_order(normalized, &self.options.priority_parts);
                let packed = container::pack(
                    raw.kind,
                    &Parts::from_vec(ordered)?,
                    self.options.compression,
                )?;
                debug!(
                    parts = part_count,
                    raw_size = raw.bytes.len(),
                    canonical_size = packed.len(),
                    "canonicalized compound container"
                );
                packed
            }
            ContainerKind::FlatText => self.normalize_flat_text(raw.bytes),
        };

        Ok(CanonicalArtifact {
            kind: raw.kind,
            bytes,
        })
    }

    /// Canonicalize, keeping the raw bytes of a malformed container when
    /// `passthrough_on_malformed` is enabled
    pub fn canonicalize_or_passthrough(
        &self,
        raw: RawArtifact,
        cache: Option<&mut CanonicalCache>,
    ) -> Result<Canonicalized, CanonicalizationError> {
        match self.canonicalize(raw.clone(), cache) {
            Ok(artifact) => Ok(Canonicalized::Canonical(artifact)),
            Err(reason) if self.options.passthrough_on_malformed => {
                warn!(
                    kind = %raw.kind,
                    size = raw.bytes.len(),
                    %reason,
                    "passing raw artifact through uncanonicalized"
                );
                Ok(Canonicalized::Passthrough { raw, reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Classify a part path with this canonicalizer's patterns
    pub fn classify(&self, path: &str) -> PartClass {
        ordering::classify(path, &self.options.markup_patterns)
    }

    /// Normalize one container part; parts that are not markup, or that
    /// fail to parse as markup, come back unchanged
    pub fn normalize_part(
        &self,
        path: &str,
        data: Vec<u8>,
        mut cache: Option<&mut CanonicalCache>,
    ) -> Vec<u8> {
        let class = self.classify(path);
        if class == PartClass::Binary {
            return data;
        }

        let key = format!("{}:{}", class.name(), hash::xxh128(&data));
        if let Some(cache) = cache.as_deref_mut()
            && let Some(hit) = cache.get(&key)
        {
            return hit;
        }

        let normalized = match std::str::from_utf8(&data) {
            Ok(text) => match self.normalize_markup(text, class.list_kind()) {
                Ok(canonical) => canonical.into_bytes(),
                Err(e) => {
                    debug!(part = path, error = %e, "part is not well-formed markup, keeping bytes");
                    data
                }
            },
            Err(_) => {
                debug!(part = path, "part is not UTF-8, keeping bytes");
                data
            }
        };

        if let Some(cache) = cache {
            cache.insert(key, normalized.clone());
        }
        normalized
    }

    fn normalize_markup(
        &self,
        text: &str,
        list: Option<ListKind>,
    ) -> Result<String, markup::MarkupError> {
        let mut doc = markup::parse(text.trim_start_matches(BOM))?;
        markup::normalize(&mut doc, &self.options.volatile, list);
        Ok(markup::serialize(&doc))
    }

    fn normalize_flat_text(&self, data: Vec<u8>) -> Vec<u8> {
        let text = match String::from_utf8(data) {
            Ok(text) => text,
            Err(e) => return e.into_bytes(),
        };
        let text = text.trim_start_matches(BOM);

        if text.trim_start().starts_with('<')
            && let Ok(canonical) = self.normalize_markup(text, None)
        {
            return canonical.into_bytes();
        }

        normalize_text_lines(text).into_bytes()
    }
}

/// `\n` line endings, no trailing blanks, exactly one final newline
/// (none for empty text)
pub fn normalize_text_lines(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = unified
        .split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect::<Vec<_>>()
        .join("\n");
    let content_len = out.trim_end_matches('\n').len();
    out.truncate(content_len);
    if !out.is_empty() {
        out.push('\n');
    }
    out
}
