// src/container/mod.rs

//! Compound container codec
//!
//! A compound document (OOXML, ODF, ...) is a ZIP archive of named parts.
//! This module unpacks such an archive into an ordered list of
//! `(path, bytes)` parts and packs parts back with fixed per-entry
//! metadata, so identical part bytes always yield identical archive bytes.
//!
//! Flat text artifacts are modelled as a container holding a single part
//! named [`FLAT_TEXT_PART`].

pub mod zip;

use crate::error::CanonicalizationError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Part name used for the content of a flat text artifact
pub const FLAT_TEXT_PART: &str = "content";

/// Declared kind of a raw artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// ZIP-based compound document
    CompoundZip,
    /// A single text (or opaque) byte stream
    FlatText,
}

impl ContainerKind {
    /// Guess the kind from magic bytes
    ///
    /// ZIP archives start with a local file header (`PK\x03\x04`) or, when
    /// empty, an end-of-central-directory record (`PK\x05\x06`).
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06") {
            Self::CompoundZip
        } else {
            Self::FlatText
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CompoundZip => "compound-zip",
            Self::FlatText => "flat-text",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compound-zip" | "zip" | "ooxml" | "odf" => Ok(Self::CompoundZip),
            "flat-text" | "text" | "flat" => Ok(Self::FlatText),
            other => Err(format!("unknown container kind: {other}")),
        }
    }
}

/// Compression applied to every entry when packing
///
/// `Stored` keeps container bytes independent of the deflate
/// implementation; `Deflate` trades that for smaller archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryCompression {
    #[default]
    Stored,
    Deflate(u32),
}

/// One named part of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub path: String,
    pub data: Vec<u8>,
}

/// Ordered collection of uniquely named parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parts {
    entries: Vec<Part>,
    index: BTreeMap<String, usize>,
}

impl Parts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a part; duplicate paths are a malformed container
    pub fn insert(&mut self, path: impl Into<String>, data: Vec<u8>) -> Result<(), CanonicalizationError> {
        let path = path.into();
        if self.index.contains_key(&path) {
            return Err(CanonicalizationError::MalformedContainer(format!(
                "duplicate part: {path}"
            )));
        }
        self.index.insert(path.clone(), self.entries.len());
        self.entries.push(Part { path, data });
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.index.get(path).map(|&i| self.entries[i].data.as_slice())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Part> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Part> {
        self.entries
    }

    /// Rebuild from parts in the given order
    pub fn from_vec(parts: Vec<Part>) -> Result<Self, CanonicalizationError> {
        let mut out = Self::new();
        for part in parts {
            out.insert(part.path, part.data)?;
        }
        Ok(out)
    }
}

/// Unpack raw bytes of the given kind into parts
pub fn unpack(kind: ContainerKind, data: &[u8]) -> Result<Parts, CanonicalizationError> {
    match kind {
        ContainerKind::CompoundZip => zip::read_archive(data),
        ContainerKind::FlatText => {
            let mut parts = Parts::new();
            parts.insert(FLAT_TEXT_PART, data.to_vec())?;
            Ok(parts)
        }
    }
}

/// Pack parts back into bytes of the given kind, in the order given
pub fn pack(
    kind: ContainerKind,
    parts: &Parts,
    compression: EntryCompression,
) -> Result<Vec<u8>, CanonicalizationError> {
    match kind {
        ContainerKind::CompoundZip => zip::write_archive(parts, compression),
        ContainerKind::FlatText => match parts.get(FLAT_TEXT_PART) {
            Some(data) if parts.len() == 1 => Ok(data.to_vec()),
            _ => Err(CanonicalizationError::MalformedContainer(format!(
                "flat text container must hold exactly one part named {FLAT_TEXT_PART:?}"
            ))),
        },
    }
}
