// tests/store.rs

//! Content-addressed store: dedup, concurrency, references and GC.

mod common;

use canonstore::hash::hash_bytes;
use canonstore::store::CompressionKind;
use canonstore::{
    ContentStore, GcOptions, HashAlgorithm, Provenance, StoreError, StoreOptions,
};
use common::init_tracing;
use filetime::FileTime;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use walkdir::WalkDir;

fn object_files(store: &ContentStore) -> usize {
    WalkDir::new(store.objects_dir())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

fn backdate(path: &Path, secs: u64) {
    let when = SystemTime::now() - Duration::from_secs(secs);
    filetime::set_file_mtime(path, FileTime::from_system_time(when)).unwrap();
}

#[test]
fn test_dedup_of_500_byte_artifact() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
    let artifact: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();

    let first = store.store(&artifact).unwrap();
    assert!(!first.existed);
    assert_eq!(first.size, 500);
    assert_eq!(first.hash, hash_bytes(HashAlgorithm::Sha256, &artifact));

    let second = store.store(&artifact).unwrap();
    assert!(second.existed);
    assert_eq!(second.hash, first.hash);
    assert_eq!(object_files(&store), 1);
}

#[test]
fn test_concurrent_stores_with_threads() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
    let payload = b"the same report, written by many workers".to_vec();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| scope.spawn(|| store.store(&payload).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.len(), 16);
    assert!(results.iter().all(|r| r.hash == results[0].hash));
    assert_eq!(results.iter().filter(|r| !r.existed).count(), 1);
    assert_eq!(object_files(&store), 1);
    assert_eq!(store.retrieve(&results[0].hash).unwrap().bytes, payload);
}

#[test]
fn test_concurrent_stores_with_rayon_and_separate_handles() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_path_buf();
    ContentStore::open(&root, StoreOptions::default()).unwrap();

    let hashes: Vec<_> = (0..32)
        .into_par_iter()
        .map(|i| {
            // Every worker opens its own handle on the same root
            let store = ContentStore::open(&root, StoreOptions::default()).unwrap();
            let (result, _) = store
                .store_with_provenance(b"shared blob", &Provenance::new(format!("unit-{i}")))
                .unwrap();
            result.hash
        })
        .collect();

    let store = ContentStore::open(&root, StoreOptions::default()).unwrap();
    assert!(hashes.iter().all(|h| *h == hashes[0]));
    assert_eq!(object_files(&store), 1);
    assert_eq!(store.provenance(&hashes[0]).unwrap().len(), 32);
}

#[test]
fn test_gc_racing_a_restore_keeps_the_blob() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
    let payload = b"unreferenced but still wanted".to_vec();
    let hash = store.store(&payload).unwrap().hash;
    let options = GcOptions {
        dry_run: false,
        max_age: Duration::from_secs(3600),
    };

    for _ in 0..25 {
        backdate(&store.object_path(&hash), 2 * 3600);
        thread::scope(|scope| {
            let collector = scope.spawn(|| store.garbage_collect(&options).unwrap());
            let writer = scope.spawn(|| {
                let result = store.store(&payload).unwrap();
                // Once store returns, the collector must not take the blob
                store.retrieve(&result.hash).unwrap().bytes
            });
            collector.join().unwrap();
            assert_eq!(writer.join().unwrap(), payload);
        });
        assert!(store.exists(&hash));
    }
    assert_eq!(object_files(&store), 1);
}

#[test]
fn test_zstd_store_is_transparent() {
    let temp_dir = TempDir::new().unwrap();
    let options = StoreOptions {
        compression: CompressionKind::Zstd,
        ..Default::default()
    };
    let store = ContentStore::open(temp_dir.path(), options).unwrap();
    let data = "line of generated text\n".repeat(200).into_bytes();

    let result = store.store(&data).unwrap();
    assert_eq!(result.hash, hash_bytes(HashAlgorithm::Sha256, &data));
    let on_disk = std::fs::metadata(store.object_path(&result.hash)).unwrap().len();
    assert!(on_disk < data.len() as u64);
    assert_eq!(store.retrieve(&result.hash).unwrap().bytes, data);
}

#[test]
fn test_uri_addressing() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
    let hash = store.store(b"addressed").unwrap().hash;

    let uri = store.uri(&hash);
    assert!(uri.starts_with("doc:"));
    assert_eq!(store.parse_hash(&uri).unwrap(), hash);
    assert_eq!(store.parse_hash(&hash.digest).unwrap(), hash);
    assert!(matches!(store.parse_hash("doc:nothex"), Err(StoreError::InvalidHash(_))));
}

#[test]
fn test_gc_respects_references_and_age() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
    let referenced = store.store(b"referenced").unwrap().hash;
    let young = store.store(b"young").unwrap().hash;
    let old = store.store(b"old").unwrap().hash;
    store
        .create_reference("release/1.0", &referenced, BTreeMap::new())
        .unwrap();
    backdate(&store.object_path(&referenced), 30 * 24 * 3600);
    backdate(&store.object_path(&old), 2 * 24 * 3600);

    let report = store.garbage_collect(&GcOptions::default()).unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.reachable, 1);
    assert_eq!(report.candidates, vec![old.clone()]);
    assert_eq!(report.removed, 1);
    assert!(store.exists(&referenced));
    assert!(store.exists(&young));
    assert!(!store.exists(&old));

    // Dropping the reference makes the old blob collectable
    assert!(store.delete_reference("release/1.0").unwrap());
    let report = store.garbage_collect(&GcOptions::default()).unwrap();
    assert_eq!(report.removed, 1);
    assert!(!store.exists(&referenced));
}

#[test]
fn test_fsck_reports_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path(), StoreOptions::default()).unwrap();
    let good = store.store(b"good").unwrap().hash;
    let bad = store.store(b"bad").unwrap().hash;

    let path = store.object_path(&bad);
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(&path, perms).unwrap();
    std::fs::write(&path, b"tampered").unwrap();

    let report = store.fsck().unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.corrupt, vec![path]);
    assert!(store.retrieve(&good).is_ok());
    assert!(matches!(store.retrieve(&bad), Err(StoreError::HashMismatch { .. })));
}
