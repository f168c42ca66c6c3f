// src/verify/extract.rs

//! Content units for semantic comparison
//!
//! A content unit is a piece of human-meaningful content: a word-processing
//! paragraph, a spreadsheet cell value or shared string, a slide text
//! paragraph, or a line of flat text. Formatting-only parts (styles,
//! themes, settings) yield no units, so two documents that differ only in
//! formatting have the same units.

use crate::canonical::PartClass;
use crate::canonical::markup::{self, Element};
use crate::container::{ContainerKind, FLAT_TEXT_PART, Parts};
use crate::hash;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitKind {
    Paragraph,
    Cell,
    SharedString,
    SlideText,
    Line,
    /// An opaque part, identified by its bytes
    Binary,
}

impl UnitKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Cell => "cell",
            Self::SharedString => "shared-string",
            Self::SlideText => "slide-text",
            Self::Line => "line",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentUnit {
    /// Part the unit was found in
    pub part: String,
    pub kind: UnitKind,
    pub text: String,
    /// SHA-256 of kind and text; the part path is not included
    pub digest: String,
}

impl ContentUnit {
    fn new(part: &str, kind: UnitKind, text: String) -> Self {
        let digest = hash::sha256(format!("{}\0{}", kind.name(), text).as_bytes());
        Self {
            part: part.to_string(),
            kind,
            text,
            digest,
        }
    }

    fn binary(part: &str, data: &[u8]) -> Self {
        Self {
            part: part.to_string(),
            kind: UnitKind::Binary,
            text: format!("<{} bytes>", data.len()),
            digest: hash::sha256(data),
        }
    }
}

/// Text of descendant elements with one of the given qualified names
fn text_of(element: &Element, names: &[&str]) -> String {
    element
        .descendants()
        .into_iter()
        .filter(|e| names.contains(&e.name.as_str()))
        .map(Element::text)
        .collect()
}

fn markup_units(path: &str, text: &str) -> Vec<ContentUnit> {
    let Ok(doc) = markup::parse(text) else {
        return vec![ContentUnit::binary(path, text.as_bytes())];
    };

    let mut units = Vec::new();
    for element in doc.elements() {
        let (kind, value) = match element.name.as_str() {
            "w:p" => (UnitKind::Paragraph, text_of(element, &["w:t"])),
            "a:p" => (UnitKind::SlideText, text_of(element, &["a:t"])),
            "c" | "x:c" => (UnitKind::Cell, text_of(element, &["v", "x:v", "t", "x:t"])),
            "si" | "x:si" => (UnitKind::SharedString, text_of(element, &["t", "x:t"])),
            _ => continue,
        };
        let value = value.trim();
        if !value.is_empty() {
            units.push(ContentUnit::new(path, kind, value.to_string()));
        }
    }
    units
}

fn line_units(path: &str, text: &str) -> Vec<ContentUnit> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| ContentUnit::new(path, UnitKind::Line, line.to_string()))
        .collect()
}

/// Extract the units of one part
pub fn part_units(path: &str, data: &[u8], class: PartClass, kind: ContainerKind) -> Vec<ContentUnit> {
    let Ok(text) = std::str::from_utf8(data) else {
        return vec![ContentUnit::binary(path, data)];
    };

    if kind == ContainerKind::FlatText && path == FLAT_TEXT_PART {
        return if text.trim_start().starts_with('<') && markup::parse(text).is_ok() {
            markup_units(path, text)
        } else {
            line_units(path, text)
        };
    }

    match class {
        PartClass::Markup => markup_units(path, text),
        // Relationship and content-type lists carry structure, not content
        PartClass::List(_) => Vec::new(),
        PartClass::Binary => vec![ContentUnit::binary(path, data)],
    }
}

/// Extract the units of every part, in part order
pub fn extract_units(
    parts: &Parts,
    kind: ContainerKind,
    classify: impl Fn(&str) -> PartClass,
) -> Vec<ContentUnit> {
    parts
        .iter()
        .flat_map(|part| part_units(&part.path, &part.data, classify(&part.path), kind))
        .collect()
}
