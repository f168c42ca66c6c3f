// src/canonical/markup.rs

//! Structured markup normalization
//!
//! Markup parts are parsed into a small owned tree, rewritten by a fixed
//! sequence of passes and serialized back with one canonical spelling:
//!
//! 1. comments removed
//! 2. volatile elements (with their subtrees) and volatile attributes removed
//! 3. whitespace normalized: `\n` line endings, trailing blanks trimmed,
//!    whitespace-only text between tags dropped (except under
//!    `xml:space="preserve"`)
//! 4. attributes sorted by qualified name
//! 5. list-like parts have their children sorted by a declared key
//!
//! Serialization always uses double-quoted attributes, self-closing empty
//! elements and a single escaping scheme, so re-normalizing the output is
//! a no-op.

use quick_xml::Reader;
use quick_xml::events::{BytesDecl, BytesStart, Event};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Markup could not be parsed; callers treat the part as binary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("markup error: {0}")]
pub struct MarkupError(String);

fn err(e: impl fmt::Display) -> MarkupError {
    MarkupError(e.to_string())
}

fn utf8(bytes: &[u8]) -> Result<String, MarkupError> {
    std::str::from_utf8(bytes).map(str::to_string).map_err(err)
}

/// XML declaration fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name, e.g. `w:p`
    pub name: String,
    /// `(qualified name, unescaped value)` pairs
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// Name without its namespace prefix
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text of every descendant text and CDATA node
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Descendant elements in document order
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_elements(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) | Node::CData(t) => out.push_str(t),
            Node::Element(e) => collect_text(&e.children, out),
            _ => {}
        }
    }
}

fn collect_elements<'a>(nodes: &'a [Node], out: &mut Vec<&'a Element>) {
    for node in nodes {
        if let Node::Element(e) = node {
            out.push(e);
            collect_elements(&e.children, out);
        }
    }
}

pub fn local_name(qname: &str) -> &str {
    qname.rsplit(':').next().unwrap_or(qname)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
    Declaration(Declaration),
    DocType(String),
}

/// A parsed markup part
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
}

impl Document {
    /// Every element in the document, in document order
    pub fn elements(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        collect_elements(&self.nodes, &mut out);
        out
    }

    pub fn root_mut(&mut self) -> Option<&mut Element> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, MarkupError> {
    let name = utf8(start.name().as_ref())?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(err)?;
        let key = utf8(attr.key.as_ref())?;
        let value = attr.unescape_value().map_err(err)?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn declaration_from(decl: &BytesDecl<'_>) -> Result<Declaration, MarkupError> {
    let version = utf8(&decl.version().map_err(err)?)?;
    let encoding = match decl.encoding().transpose().map_err(err)? {
        Some(e) => Some(utf8(&e)?),
        None => None,
    };
    let standalone = match decl.standalone().transpose().map_err(err)? {
        Some(s) => Some(utf8(&s)?),
        None => None,
    };
    Ok(Declaration {
        version,
        encoding,
        standalone,
    })
}

/// Parse markup text into a [`Document`]
pub fn parse(text: &str) -> Result<Document, MarkupError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Element> = Vec::new();
    let mut top: Vec<Node> = Vec::new();

    loop {
        let node = match reader.read_event().map_err(err)? {
            Event::Start(e) => {
                stack.push(element_from(&e)?);
                continue;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| MarkupError("unbalanced end tag".to_string()))?;
                Node::Element(element)
            }
            Event::Empty(e) => Node::Element(element_from(&e)?),
            Event::Text(e) => Node::Text(e.unescape().map_err(err)?.into_owned()),
            Event::CData(e) => Node::CData(utf8(&e)?),
            Event::Comment(e) => Node::Comment(utf8(&e)?),
            Event::PI(e) => Node::ProcessingInstruction(utf8(&e)?),
            Event::Decl(e) => Node::Declaration(declaration_from(&e)?),
            Event::DocType(e) => Node::DocType(utf8(&e)?),
            Event::Eof => break,
        };
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => top.push(node),
        }
    }

    if let Some(open) = stack.last() {
        return Err(MarkupError(format!("unclosed element <{}>", open.name)));
    }
    if !top.iter().any(|n| matches!(n, Node::Element(_))) {
        return Err(MarkupError("no root element".to_string()));
    }
    Ok(Document { nodes: top })
}

/// Names of elements and attributes that vary between otherwise identical
/// documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileRules {
    /// Qualified element names dropped together with their subtree
    pub elements: BTreeSet<String>,
    /// Qualified attribute names dropped from every element
    pub attributes: BTreeSet<String>,
    /// Attributes whose local name starts with one of these are dropped
    pub attribute_prefixes: Vec<String>,
}

impl Default for VolatileRules {
    fn default() -> Self {
        let elements = [
            // Core properties
            "dcterms:created",
            "dcterms:modified",
            "cp:lastModifiedBy",
            "cp:revision",
            "cp:lastPrinted",
            // Word revision-save identifiers
            "w:rsid",
            "w:rsids",
            "w:rsidRoot",
            // Extended (application) properties
            "Application",
            "AppVersion",
            "TotalTime",
            "DocSecurity",
            // ODF meta.xml
            "meta:creation-date",
            "dc:date",
            "meta:editing-duration",
            "meta:editing-cycles",
            "meta:generator",
        ];
        let attributes = ["w14:paraId", "w14:textId", "xr:uid", "xr:revisionUid"];
        Self {
            elements: elements.iter().map(|s| s.to_string()).collect(),
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
            attribute_prefixes: vec!["rsid".to_string()],
        }
    }
}

impl VolatileRules {
    fn is_volatile_attribute(&self, qname: &str) -> bool {
        if qname == "xmlns" || qname.starts_with("xmlns:") {
            return false;
        }
        let local = local_name(qname);
        self.attributes.contains(qname)
            || self
                .attribute_prefixes
                .iter()
                .any(|p| local.starts_with(p.as_str()))
    }
}

/// Pass 1: drop comments
pub fn strip_comments(nodes: &mut Vec<Node>) {
    nodes.retain(|n| !matches!(n, Node::Comment(_)));
    for node in nodes.iter_mut() {
        if let Node::Element(e) = node {
            strip_comments(&mut e.children);
        }
    }
}

/// Pass 2: drop volatile elements and attributes
pub fn strip_volatile(nodes: &mut Vec<Node>, rules: &VolatileRules) {
    nodes.retain(|n| match n {
        Node::Element(e) => !rules.elements.contains(&e.name),
        _ => true,
    });
    for node in nodes.iter_mut() {
        if let Node::Element(e) = node {
            e.attributes.retain(|(k, _)| !rules.is_volatile_attribute(k));
            strip_volatile(&mut e.children, rules);
        }
    }
}

fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Trim blanks before every line break; the final segment is kept as is
fn trim_line_ends(s: &str) -> String {
    let segments: Vec<&str> = s.split('\n').collect();
    let last = segments.len() - 1;
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            if i < last {
                seg.trim_end_matches([' ', '\t'])
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pass 3: normalize whitespace
pub fn normalize_whitespace(nodes: &mut Vec<Node>, preserve: bool) {
    // Removing comments and volatile elements can leave text nodes adjacent
    let mut merged: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        if let Node::Text(next) = &node
            && let Some(Node::Text(prev)) = merged.last_mut()
        {
            prev.push_str(next);
            continue;
        }
        merged.push(node);
    }

    for node in merged.iter_mut() {
        match node {
            Node::Text(t) => {
                let normalized = normalize_line_endings(t);
                *t = if preserve {
                    normalized
                } else {
                    trim_line_ends(&normalized)
                };
            }
            Node::CData(t) => *t = normalize_line_endings(t),
            Node::Element(e) => {
                let child_preserve = match e.attr("xml:space") {
                    Some("preserve") => true,
                    Some("default") => false,
                    _ => preserve,
                };
                normalize_whitespace(&mut e.children, child_preserve);
            }
            _ => {}
        }
    }

    if !preserve {
        merged.retain(|n| !matches!(n, Node::Text(t) if t.trim().is_empty()));
    }
    *nodes = merged;
}

/// Pass 4: sort attributes by qualified name
pub fn sort_attributes(nodes: &mut [Node]) {
    for node in nodes.iter_mut() {
        if let Node::Element(e) = node {
            e.attributes.sort_by(|a, b| a.0.cmp(&b.0));
            sort_attributes(&mut e.children);
        }
    }
}

/// List-like parts whose children are ordered by a declared key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// `[Content_Types].xml`: `Default` by extension, then `Override` by part name
    ContentTypes,
    /// `*.rels`: `Relationship` by target, then id
    Relationships,
}

fn list_sort_key(kind: ListKind, node: &Node) -> (u8, String, String) {
    let Node::Element(e) = node else {
        return (u8::MAX, String::new(), String::new());
    };
    let attr = |name: &str| e.attr(name).unwrap_or_default().to_string();
    match (kind, e.local_name()) {
        (ListKind::ContentTypes, "Default") => {
            let ext = attr("Extension");
            (0, ext.to_lowercase(), ext)
        }
        (ListKind::ContentTypes, "Override") => {
            let name = attr("PartName");
            (1, name.to_lowercase(), name)
        }
        (ListKind::Relationships, "Relationship") => (0, attr("Target"), attr("Id")),
        _ => (2, e.name.clone(), String::new()),
    }
}

/// Pass 5: sort the root element's children of a list-like part
pub fn sort_list(doc: &mut Document, kind: ListKind) {
    if let Some(root) = doc.root_mut() {
        root.children
            .sort_by_cached_key(|node| list_sort_key(kind, node));
    }
}

fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Declaration(d) => {
            out.push_str("<?xml version=\"");
            out.push_str(&d.version);
            out.push('"');
            if let Some(enc) = &d.encoding {
                out.push_str(" encoding=\"");
                out.push_str(&enc.to_uppercase());
                out.push('"');
            }
            if let Some(sa) = &d.standalone {
                out.push_str(" standalone=\"");
                out.push_str(sa);
                out.push('"');
            }
            out.push_str("?>");
        }
        Node::DocType(d) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(d.trim());
            out.push('>');
        }
        Node::ProcessingInstruction(pi) => {
            out.push_str("<?");
            out.push_str(pi);
            out.push_str("?>");
        }
        Node::Comment(c) => {
            out.push_str("<!--");
            out.push_str(c);
            out.push_str("-->");
        }
        Node::CData(c) => {
            out.push_str("<![CDATA[");
            out.push_str(c);
            out.push_str("]]>");
        }
        Node::Text(t) => escape_text(t, out),
        Node::Element(e) => {
            out.push('<');
            out.push_str(&e.name);
            for (key, value) in &e.attributes {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                escape_attr(value, out);
                out.push('"');
            }
            if e.children.is_empty() {
                out.push_str("/>");
            } else {
                out.push('>');
                for child in &e.children {
                    write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&e.name);
                out.push('>');
            }
        }
    }
}

/// Serialize a document in canonical spelling
pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    for node in &doc.nodes {
        write_node(node, &mut out);
    }
    out
}

/// Run every pass in order
pub fn normalize(doc: &mut Document, rules: &VolatileRules, list: Option<ListKind>) {
    strip_comments(&mut doc.nodes);
    strip_volatile(&mut doc.nodes, rules);
    normalize_whitespace(&mut doc.nodes, false);
    sort_attributes(&mut doc.nodes);
    if let Some(kind) = list {
        sort_list(doc, kind);
    }
}

/// Break single-line canonical markup into one tag per line for diffing
pub fn diff_view(canonical: &str) -> String {
    canonical.replace("><", ">\n<")
}
