// tests/common/mod.rs

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use canonstore::container::zip;
use canonstore::container::{EntryCompression, Parts};
use canonstore::{ContainerKind, RawArtifact};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const CT_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";
const REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Builder for small word-processing documents.
///
/// `variant()` produces the same logical document with a different
/// physical encoding: reversed part order, reordered attributes and list
/// entries, indentation, a lower-case declaration encoding and deflated
/// entries.
#[derive(Debug, Clone)]
pub struct DocxFixture {
    paragraphs: Vec<String>,
    created: String,
    rsid: String,
    variant: bool,
    compression: EntryCompression,
}

impl DocxFixture {
    pub fn new(paragraphs: &[&str]) -> Self {
        Self {
            paragraphs: paragraphs.iter().map(|p| p.to_string()).collect(),
            created: "2024-01-01T00:00:00Z".to_string(),
            rsid: "00A1B2C3".to_string(),
            variant: false,
            compression: EntryCompression::Stored,
        }
    }

    pub fn created(mut self, created: &str) -> Self {
        self.created = created.to_string();
        self
    }

    pub fn rsid(mut self, rsid: &str) -> Self {
        self.rsid = rsid.to_string();
        self
    }

    pub fn variant(mut self) -> Self {
        self.variant = true;
        self.compression = EntryCompression::Deflate(9);
        self
    }

    fn content_types(&self) -> String {
        let mut entries = vec![
            r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#.to_string(),
            r#"<Default Extension="xml" ContentType="application/xml"/>"#.to_string(),
            r#"<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>"#.to_string(),
            r#"<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#.to_string(),
        ];
        if self.variant {
            entries.reverse();
        }
        format!("{}<Types xmlns=\"{CT_NS}\">{}</Types>", self.declaration(), entries.concat())
    }

    fn relationships(&self) -> String {
        let mut rels = vec![
            r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>"#,
            r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>"#,
        ];
        if self.variant {
            rels.reverse();
        }
        format!("{}<Relationships xmlns=\"{REL_NS}\">{}</Relationships>", self.declaration(), rels.concat())
    }

    fn core(&self) -> String {
        format!(
            "{}<cp:coreProperties xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
             xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:dcterms=\"http://purl.org/dc/terms/\">\
             <dc:title>Fixture</dc:title><dcterms:created>{}</dcterms:created>\
             <dcterms:modified>{}</dcterms:modified><cp:revision>3</cp:revision></cp:coreProperties>",
            self.declaration(),
            self.created,
            self.created
        )
    }

    fn document(&self) -> String {
        let (sep, indent) = if self.variant { ("\n", "  ") } else { ("", "") };
        let paragraphs: String = self
            .paragraphs
            .iter()
            .map(|p| {
                if self.variant {
                    format!(
                        "{indent}{indent}<w:p w:rsidRDefault=\"{rsid}\" w:rsidR=\"{rsid}\"><w:r><w:t>{p}</w:t></w:r></w:p>{sep}",
                        rsid = self.rsid
                    )
                } else {
                    format!(
                        "<w:p w:rsidR=\"{rsid}\" w:rsidRDefault=\"{rsid}\"><w:r><w:t>{p}</w:t></w:r></w:p>",
                        rsid = self.rsid
                    )
                }
            })
            .collect();
        let root_attrs = if self.variant {
            format!("xmlns:w=\"{W_NS}\" w:conformance=\"transitional\"")
        } else {
            format!("w:conformance=\"transitional\" xmlns:w=\"{W_NS}\"")
        };
        format!(
            "{}<w:document {root_attrs}>{sep}{indent}<w:body>{sep}{paragraphs}{indent}<w:sectPr><w:rsid w:val=\"{}\"/></w:sectPr>{sep}{indent}</w:body>{sep}</w:document>",
            self.declaration(),
            self.rsid
        )
    }

    fn declaration(&self) -> &'static str {
        if self.variant {
            "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\"?>"
        } else {
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>"
        }
    }

    pub fn parts(&self) -> Parts {
        let mut entries = vec![
            ("[Content_Types].xml", self.content_types().into_bytes()),
            ("_rels/.rels", self.relationships().into_bytes()),
            ("docProps/core.xml", self.core().into_bytes()),
            ("word/document.xml", self.document().into_bytes()),
            ("word/media/image1.png", vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3]),
        ];
        if self.variant {
            entries.reverse();
        }
        let mut parts = Parts::new();
        for (path, data) in entries {
            parts.insert(path, data).unwrap();
        }
        parts
    }

    pub fn bytes(&self) -> Vec<u8> {
        zip::write_archive(&self.parts(), self.compression).unwrap()
    }

    pub fn build(&self) -> RawArtifact {
        RawArtifact::new(self.bytes(), ContainerKind::CompoundZip)
    }
}

/// A flat text artifact
pub fn text(body: &str) -> RawArtifact {
    RawArtifact::new(body.as_bytes().to_vec(), ContainerKind::FlatText)
}
