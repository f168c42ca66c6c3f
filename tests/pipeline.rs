// tests/pipeline.rs

//! End-to-end runs: canonicalize, store, reference and place.

mod common;

use canonstore::pipeline::PROCESSED_PREFIX;
use canonstore::{
    Config, ContentStore, Error, GenerationUnit, Pipeline, PlacementEngine, PlacementStatus,
};
use common::{DocxFixture, init_tracing, text};
use std::fs;
use tempfile::TempDir;

fn pipeline_from_config(dir: &TempDir, extra: &str) -> Pipeline {
    let config = Config::from_toml_str(&format!(
        "[store]\nroot = {store:?}\n\n[placement]\nroot = {out:?}\n{extra}",
        store = dir.path().join("store").display().to_string(),
        out = dir.path().join("out").display().to_string(),
    ))
    .unwrap();

    let store = ContentStore::open(&config.store.root, config.store_options()).unwrap();
    let canonicalizer = canonstore::Canonicalizer::new(config.canonicalize_options().unwrap());
    Pipeline::new(canonicalizer, store)
        .with_placement(PlacementEngine::new(&config.placement.root, config.placement_options()))
        .with_cache_entries(config.canonicalize.cache_entries)
}

#[test]
fn test_renderings_of_one_document_share_a_blob() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let pipeline = pipeline_from_config(&temp_dir, "");
    let fixture = DocxFixture::new(&["Invoice 42", "Total: 100"]);

    let units = vec![
        GenerationUnit::new("run-1", fixture.build()).with_directive("to: invoice.docx"),
        GenerationUnit::new(
            "run-2",
            fixture.clone().created("2025-02-02T02:02:02Z").variant().build(),
        )
        .with_directive("to: invoice.docx"),
    ];
    let report = pipeline.run_batch(units);
    assert!(report.is_success(), "{:?}", report.failures().collect::<Vec<_>>());

    let processed: Vec<_> = report
        .items
        .iter()
        .map(|item| item.result.as_ref().unwrap())
        .collect();
    assert_eq!(processed[0].hash, processed[1].hash);
    assert_ne!(processed[0].input_hash, processed[1].input_hash);

    let store = pipeline.store();
    assert_eq!(store.list_objects().unwrap().len(), 1);
    assert_eq!(
        store.list_references(Some(PROCESSED_PREFIX)).unwrap().len(),
        2
    );
    assert_eq!(store.provenance(&processed[0].hash).unwrap().len(), 2);

    // Whichever unit placed first, the target holds the canonical bytes
    let placed = fs::read(temp_dir.path().join("out/invoice.docx")).unwrap();
    assert_eq!(placed, store.retrieve(&processed[0].hash).unwrap().bytes);
    let statuses: Vec<_> = processed
        .iter()
        .map(|p| p.placement.as_ref().unwrap().status.clone())
        .collect();
    assert!(statuses.contains(&PlacementStatus::Written));
}

#[test]
fn test_rerun_is_a_no_op() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = pipeline_from_config(&temp_dir, "markers = true\n");
    fs::create_dir_all(temp_dir.path().join("out")).unwrap();
    fs::write(temp_dir.path().join("out/main.py"), "import os\n# imports\n").unwrap();

    let unit = || {
        GenerationUnit::new("imports", text("import sys   \r\n"))
            .with_directive("---\nto: main.py\ninject: true\nafter: '# imports'\n---\n")
    };

    let first = pipeline.process(unit(), None).unwrap();
    assert!(!first.existed);
    assert!(first.placement.unwrap().is_written());

    let second = pipeline.process(unit(), None).unwrap();
    assert!(second.existed);
    assert_eq!(second.placement.unwrap().status, PlacementStatus::Unchanged);

    let main = fs::read_to_string(temp_dir.path().join("out/main.py")).unwrap();
    assert_eq!(main.matches("import sys").count(), 1);
    assert!(main.starts_with("import os\n# imports\n# canonstore:begin "));
}

#[test]
fn test_failures_are_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = pipeline_from_config(&temp_dir, "");

    let mut truncated = DocxFixture::new(&["x"]).bytes();
    truncated.truncate(10);
    let units = vec![
        GenerationUnit::new("ok", text("fine\n")),
        GenerationUnit::new(
            "broken",
            canonstore::RawArtifact::new(truncated, canonstore::ContainerKind::CompoundZip),
        ),
        GenerationUnit::new("anchor", text("x")).with_directive("to: missing.txt\ninject: true\nafter: nope"),
        GenerationUnit::new("skipped", text("y")).with_directive("to: y.txt\nskip: true"),
    ];

    let report = pipeline.run_batch(units);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 2);

    let failures: Vec<_> = report.failures().collect();
    assert!(matches!(failures[0], ("broken", Error::Canonicalization(_))));
    assert!(matches!(failures[1], ("anchor", Error::Placement(_))));

    let skipped = report.items[3].result.as_ref().unwrap();
    assert!(matches!(
        skipped.placement.as_ref().unwrap().status,
        PlacementStatus::Skipped(_)
    ));
    assert!(!temp_dir.path().join("out/y.txt").exists());
}

#[test]
fn test_passthrough_when_enabled() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = pipeline_from_config(&temp_dir, "\n[canonicalize]\npassthrough_on_malformed = true\n");

    let mut truncated = DocxFixture::new(&["x"]).bytes();
    truncated.truncate(10);
    let raw = canonstore::RawArtifact::new(truncated.clone(), canonstore::ContainerKind::CompoundZip);

    let processed = pipeline.process(GenerationUnit::new("raw", raw), None).unwrap();
    assert!(processed.passthrough);
    assert_eq!(pipeline.store().retrieve(&processed.hash).unwrap().bytes, truncated);
    let records = pipeline.store().provenance(&processed.hash).unwrap();
    assert_eq!(records[0].extra["passthrough"], "true");
}
