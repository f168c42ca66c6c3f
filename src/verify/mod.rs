// src/verify/mod.rs

//! Equivalence verifier
//!
//! Two artifacts are identical when their canonical forms hash the same.
//! That check is authoritative. When the hashes differ a bounded
//! structural diff explains why: parts present on one side only, and parts
//! present on both sides with different normalized bytes. The diff is
//! diagnostic and never changes the verdict.
//!
//! [`EquivalenceVerifier::verify_semantic`] compares human-meaningful
//! content units instead of bytes, for "same meaning, different
//! formatting" questions.

pub mod extract;

pub use extract::{ContentUnit, UnitKind};

use crate::canonical::{CanonicalArtifact, Canonicalizer, PartClass, RawArtifact, markup};
use crate::container::{self, Parts};
use crate::error::{CanonicalizationError, Result};
use crate::hash::{ContentHash, HashAlgorithm};
use crate::store::ContentStore;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Upper bound on the lines of a part diff
pub const MAX_DETAIL_LINES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DifferenceKind {
    /// Part present only in the second artifact
    Added,
    /// Part present only in the first artifact
    Removed,
    /// Part present in both with different content
    PartMismatch,
}

impl fmt::Display for DifferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::PartMismatch => "part-mismatch",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Difference {
    pub kind: DifferenceKind,
    pub path: String,
    /// Unified diff of the part, for text parts
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquivalenceReport {
    pub identical: bool,
    pub hash_a: ContentHash,
    pub hash_b: ContentHash,
    pub differences: Vec<Difference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemanticReport {
    /// Both artifacts have the same multiset of content units
    pub equivalent: bool,
    /// Units found only in the second artifact
    pub added: Vec<ContentUnit>,
    /// Units found only in the first artifact
    pub removed: Vec<ContentUnit>,
}

/// Compares artifacts through a shared canonicalizer
#[derive(Debug, Clone, Copy)]
pub struct EquivalenceVerifier<'a> {
    canonicalizer: &'a Canonicalizer,
    algorithm: HashAlgorithm,
}

impl<'a> EquivalenceVerifier<'a> {
    pub fn new(canonicalizer: &'a Canonicalizer) -> Self {
        Self {
            canonicalizer,
            algorithm: HashAlgorithm::Sha256,
        }
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Canonicalize both artifacts and compare them
    pub fn verify_equivalence(
        &self,
        a: RawArtifact,
        b: RawArtifact,
    ) -> Result<EquivalenceReport, CanonicalizationError> {
        let a = self.canonicalizer.canonicalize(a, None)?;
        let b = self.canonicalizer.canonicalize(b, None)?;
        self.compare_canonical(&a, &b)
    }

    /// Compare two artifacts already in canonical form
    pub fn compare_canonical(
        &self,
        a: &CanonicalArtifact,
        b: &CanonicalArtifact,
    ) -> Result<EquivalenceReport, CanonicalizationError> {
        let hash_a = a.hash(self.algorithm);
        let hash_b = b.hash(self.algorithm);

        if hash_a == hash_b {
            debug!(hash = %hash_a, "artifacts identical");
            return Ok(EquivalenceReport {
                identical: true,
                hash_a,
                hash_b,
                differences: Vec::new(),
            });
        }

        let parts_a = container::unpack(a.kind(), a.bytes())?;
        let parts_b = container::unpack(b.kind(), b.bytes())?;
        let differences = self.diff_parts(&parts_a, &parts_b);
        debug!(
            hash_a = %hash_a,
            hash_b = %hash_b,
            differences = differences.len(),
            "artifacts differ"
        );

        Ok(EquivalenceReport {
            identical: false,
            hash_a,
            hash_b,
            differences,
        })
    }

    fn diff_parts(&self, a: &Parts, b: &Parts) -> Vec<Difference> {
        let mut differences = Vec::new();
        for part in a.iter() {
            match b.get(&part.path) {
                None => differences.push(Difference {
                    kind: DifferenceKind::Removed,
                    path: part.path.clone(),
                    detail: None,
                }),
                Some(other) if other != part.data.as_slice() => differences.push(Difference {
                    kind: DifferenceKind::PartMismatch,
                    path: part.path.clone(),
                    detail: self.part_detail(&part.path, &part.data, other),
                }),
                Some(_) => {}
            }
        }
        for part in b.iter().filter(|p| !a.contains(&p.path)) {
            differences.push(Difference {
                kind: DifferenceKind::Added,
                path: part.path.clone(),
                detail: None,
            });
        }
        differences
    }

    /// Bounded unified diff of a text part
    fn part_detail(&self, path: &str, a: &[u8], b: &[u8]) -> Option<String> {
        let a = std::str::from_utf8(a).ok()?;
        let b = std::str::from_utf8(b).ok()?;
        let (a, b) = match self.canonicalizer.classify(path) {
            PartClass::Binary => (a.to_string(), b.to_string()),
            _ => (markup::diff_view(a), markup::diff_view(b)),
        };

        let patch = diffy::create_patch(&a, &b).to_string();
        let total = patch.lines().count();
        if total <= MAX_DETAIL_LINES {
            return Some(patch);
        }
        let mut truncated: String = patch
            .lines()
            .take(MAX_DETAIL_LINES)
            .flat_map(|line| [line, "\n"])
            .collect();
        truncated.push_str(&format!("... {} more lines\n", total - MAX_DETAIL_LINES));
        Some(truncated)
    }

    /// Compare the content units of two artifacts as multisets
    pub fn verify_semantic(
        &self,
        a: RawArtifact,
        b: RawArtifact,
    ) -> Result<SemanticReport, CanonicalizationError> {
        let a = self.canonicalizer.canonicalize(a, None)?;
        let b = self.canonicalizer.canonicalize(b, None)?;
        let units_a = self.units(&a)?;
        let units_b = self.units(&b)?;

        let mut counts: HashMap<&str, isize> = HashMap::new();
        for unit in &units_a {
            *counts.entry(unit.digest.as_str()).or_default() += 1;
        }
        for unit in &units_b {
            *counts.entry(unit.digest.as_str()).or_default() -= 1;
        }

        // Walk each side in document order, taking surplus occurrences
        let mut surplus_a = counts.clone();
        let removed: Vec<ContentUnit> = units_a
            .iter()
            .filter(|u| take_surplus(&mut surplus_a, &u.digest, 1))
            .cloned()
            .collect();
        let mut surplus_b = counts;
        let added: Vec<ContentUnit> = units_b
            .iter()
            .filter(|u| take_surplus(&mut surplus_b, &u.digest, -1))
            .cloned()
            .collect();

        Ok(SemanticReport {
            equivalent: added.is_empty() && removed.is_empty(),
            added,
            removed,
        })
    }

    fn units(&self, artifact: &CanonicalArtifact) -> Result<Vec<ContentUnit>, CanonicalizationError> {
        let parts = container::unpack(artifact.kind(), artifact.bytes())?;
        Ok(extract::extract_units(&parts, artifact.kind(), |path| {
            self.canonicalizer.classify(path)
        }))
    }

    /// Canonicalize `a` and compare it with a stored blob
    pub fn verify_against_store(
        &self,
        store: &ContentStore,
        a: RawArtifact,
        hash: &ContentHash,
    ) -> Result<EquivalenceReport> {
        let stored = store.retrieve(hash)?;
        let a = self.canonicalizer.canonicalize(a, None)?;
        let b = CanonicalArtifact::from_stored(stored.bytes);
        let verifier = self.with_algorithm(store.algorithm());
        Ok(verifier.compare_canonical(&a, &b)?)
    }
}

/// Consume one surplus occurrence of `digest` on the side whose surplus
/// has the sign of `sign`
fn take_surplus(counts: &mut HashMap<&str, isize>, digest: &str, sign: isize) -> bool {
    match counts.get_mut(digest) {
        Some(n) if *n * sign > 0 => {
            *n -= sign;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerKind, EntryCompression, zip};

    fn docx(paragraphs: &[&str]) -> RawArtifact {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
            .collect();
        let mut parts = Parts::new();
        parts
            .insert("[Content_Types].xml", b"<Types/>".to_vec())
            .unwrap();
        parts
            .insert(
                "word/document.xml",
                format!("<w:document><w:body>{body}</w:body></w:document>").into_bytes(),
            )
            .unwrap();
        RawArtifact::new(
            zip::write_archive(&parts, EntryCompression::Stored).unwrap(),
            ContainerKind::CompoundZip,
        )
    }

    #[test]
    fn test_identical_fast_path() {
        let c = Canonicalizer::default();
        let verifier = EquivalenceVerifier::new(&c);
        let report = verifier.verify_equivalence(docx(&["a"]), docx(&["a"])).unwrap();
        assert!(report.identical);
        assert!(report.differences.is_empty());
        assert_eq!(report.hash_a, report.hash_b);
    }

    #[test]
    fn test_part_mismatch_with_detail() {
        let c = Canonicalizer::default();
        let verifier = EquivalenceVerifier::new(&c);
        let report = verifier
            .verify_equivalence(docx(&["before"]), docx(&["after"]))
            .unwrap();
        assert!(!report.identical);
        assert_eq!(report.differences.len(), 1);
        let diff = &report.differences[0];
        assert_eq!(diff.kind, DifferenceKind::PartMismatch);
        assert_eq!(diff.path, "word/document.xml");
        let detail = diff.detail.as_deref().unwrap();
        assert!(detail.contains("-<w:t>before</w:t>"), "{detail}");
        assert!(detail.contains("+<w:t>after</w:t>"), "{detail}");
    }

    #[test]
    fn test_added_and_removed_parts() {
        let c = Canonicalizer::default();
        let verifier = EquivalenceVerifier::new(&c);
        let a = RawArtifact::new(b"only text\n".to_vec(), ContainerKind::FlatText);
        let report = verifier.verify_equivalence(a, docx(&["x"])).unwrap();
        let kinds: Vec<_> = report.differences.iter().map(|d| (d.kind, d.path.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (DifferenceKind::Removed, "content"),
                (DifferenceKind::Added, "[Content_Types].xml"),
                (DifferenceKind::Added, "word/document.xml"),
            ]
        );
    }

    #[test]
    fn test_detail_is_bounded() {
        let c = Canonicalizer::default();
        let verifier = EquivalenceVerifier::new(&c);
        let a: String = (0..200).map(|i| format!("line {i}\n")).collect();
        let b: String = (0..200).map(|i| format!("row {i}\n")).collect();
        let report = verifier
            .verify_equivalence(
                RawArtifact::new(a, ContainerKind::FlatText),
                RawArtifact::new(b, ContainerKind::FlatText),
            )
            .unwrap();
        let detail = report.differences[0].detail.as_deref().unwrap();
        assert_eq!(detail.lines().count(), MAX_DETAIL_LINES + 1);
        assert!(detail.lines().last().unwrap().ends_with("more lines"));
    }

    #[test]
    fn test_semantic_multiset() {
        let c = Canonicalizer::default();
        let verifier = EquivalenceVerifier::new(&c);

        let same = verifier
            .verify_semantic(docx(&["a", "b"]), docx(&["a", "b"]))
            .unwrap();
        assert!(same.equivalent);

        let report = verifier
            .verify_semantic(docx(&["a", "a", "b"]), docx(&["a", "c"]))
            .unwrap();
        assert!(!report.equivalent);
        let removed: Vec<_> = report.removed.iter().map(|u| u.text.as_str()).collect();
        let added: Vec<_> = report.added.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(removed, vec!["a", "b"]);
        assert_eq!(added, vec!["c"]);
    }
}
