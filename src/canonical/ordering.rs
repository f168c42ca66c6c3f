// src/canonical/ordering.rs

//! Part classification and deterministic part ordering

use crate::canonical::markup::ListKind;
use crate::container::Part;
use glob::Pattern;

/// Path of the OPC content-type declarations part
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Paths packed before every other part, in this order
pub const DEFAULT_PRIORITY_PARTS: &[&str] = &["mimetype", CONTENT_TYPES_PART, "_rels/.rels"];

/// Default glob patterns selecting markup parts
pub const DEFAULT_MARKUP_PATTERNS: &[&str] = &["*.xml", "*.rels", "*.vml"];

/// How a part is normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartClass {
    /// Markup whose root children are sorted by a declared key
    List(ListKind),
    /// Other markup
    Markup,
    /// Passed through unchanged
    Binary,
}

impl PartClass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::List(ListKind::ContentTypes) => "content-types",
            Self::List(ListKind::Relationships) => "relationships",
            Self::Markup => "markup",
            Self::Binary => "binary",
        }
    }

    pub fn list_kind(&self) -> Option<ListKind> {
        match self {
            Self::List(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Classify a part by its path
pub fn classify(path: &str, markup_patterns: &[Pattern]) -> PartClass {
    if path == CONTENT_TYPES_PART {
        return PartClass::List(ListKind::ContentTypes);
    }
    if path.ends_with(".rels") {
        return PartClass::List(ListKind::Relationships);
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if markup_patterns
        .iter()
        .any(|p| p.matches(path) || p.matches(file_name))
    {
        PartClass::Markup
    } else {
        PartClass::Binary
    }
}

/// Order parts: priority paths first (in list order), then byte order
pub fn canonical_order(mut parts: Vec<Part>, priority: &[String]) -> Vec<Part> {
    let rank = |path: &str| {
        priority
            .iter()
            .position(|p| p == path)
            .unwrap_or(usize::MAX)
    };
    parts.sort_by(|a, b| {
        rank(&a.path)
            .cmp(&rank(&b.path))
            .then_with(|| a.path.as_bytes().cmp(b.path.as_bytes()))
    });
    parts
}
