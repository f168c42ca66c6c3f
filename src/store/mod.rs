// src/store/mod.rs

//! Content-addressed store for canonical artifacts
//!
//! Blobs are stored by the hash of their canonical bytes, similar to git's
//! object storage. Layout under the store root:
//!
//! ```text
//! store.json                 algorithm and codec, fixed at creation
//! objects/<2>/<rest>         blobs, sharded by the first two hex digits
//! refs/<name>                named references (JSON)
//! metadata/<digest>.json     provenance records (JSON array)
//! locks/<digest>.lock        per-hash locks
//! tmp/                       staging area for atomic writes
//! gc.lock                    collector lock
//! ```
//!
//! Storing the same bytes twice creates one blob. The dedup check and the
//! write happen under the per-hash lock, and objects are staged in `tmp/`
//! then renamed into place without clobbering, so concurrent stores of the
//! same bytes never produce two writes to the same path and a blob never
//! appears under its final name with partial content.

pub mod codec;
pub mod gc;
pub mod lock;
pub mod provenance;
pub mod refs;

pub use codec::{BlobCodec, CompressionKind, NoCompression, ZstdCodec};
pub use gc::{GcOptions, GcReport};
pub use lock::FileLock;
pub use provenance::{Provenance, ProvenanceRecord};
pub use refs::Reference;

use crate::error::StoreError;
use crate::filesystem::{WriteOptions, WriteOutcome, write_atomic};
use crate::hash::{self, ContentHash, HashAlgorithm};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Version of the on-disk layout
pub const STORE_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "store.json";
const OBJECTS_DIR: &str = "objects";
const REFS_DIR: &str = "refs";
const METADATA_DIR: &str = "metadata";
const LOCKS_DIR: &str = "locks";
const TMP_DIR: &str = "tmp";
const GC_LOCK_FILE: &str = "gc.lock";

/// Store options
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Algorithm for new stores; an existing store keeps its own
    pub algorithm: HashAlgorithm,
    /// Codec for new stores; an existing store keeps its own
    pub compression: CompressionKind,
    pub zstd_level: i32,
    /// Rehash blobs on retrieval
    pub verify_on_read: bool,
    /// Compare bytes with the existing blob on a dedup hit
    pub verify_on_dedup: bool,
    /// Scheme used by [`ContentStore::uri`]
    pub uri_scheme: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            compression: CompressionKind::None,
            zstd_level: codec::DEFAULT_ZSTD_LEVEL,
            verify_on_read: true,
            verify_on_dedup: true,
            uri_scheme: hash::DEFAULT_URI_SCHEME.to_string(),
        }
    }
}

/// Contents of `store.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreManifest {
    format_version: u32,
    algorithm: HashAlgorithm,
    compression: CompressionKind,
    zstd_level: i32,
    created_at: DateTime<Utc>,
}

/// Outcome of a store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResult {
    pub hash: ContentHash,
    /// The blob was already present; nothing was written
    pub existed: bool,
    /// Size of the canonical bytes
    pub size: u64,
}

/// A stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub hash: ContentHash,
    pub bytes: Vec<u8>,
    pub size: u64,
}

/// On-disk facts about a blob
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub hash: ContentHash,
    pub path: PathBuf,
    /// Size of the object file (after encoding)
    pub stored_size: u64,
    pub modified: SystemTime,
}

/// Result of [`ContentStore::fsck`]
#[derive(Debug, Clone, Default)]
pub struct FsckReport {
    pub checked: usize,
    /// Objects whose bytes do not hash to their name
    pub corrupt: Vec<PathBuf>,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// Content-addressed store rooted at a directory
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    algorithm: HashAlgorithm,
    codec: Arc<dyn BlobCodec>,
    options: StoreOptions,
}

impl ContentStore {
    /// Open the store at `root`, creating it if needed
    ///
    /// A new store records `options.algorithm` and `options.compression`
    /// in `store.json`. An existing store always keeps what it recorded.
    pub fn open(root: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for dir in [OBJECTS_DIR, REFS_DIR, METADATA_DIR, LOCKS_DIR, TMP_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }

        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            let manifest: StoreManifest = read_json(&manifest_path)?;
            if manifest.format_version != STORE_FORMAT_VERSION {
                return Err(StoreError::Codec(format!(
                    "unsupported store format version {} at {}",
                    manifest.format_version,
                    root.display()
                )));
            }
            if manifest.algorithm != options.algorithm || manifest.compression != options.compression {
                warn!(
                    root = %root.display(),
                    recorded_algorithm = %manifest.algorithm,
                    recorded_compression = %manifest.compression,
                    "store options differ from the recorded ones; using recorded"
                );
            }
            manifest
        } else {
            let manifest = StoreManifest {
                format_version: STORE_FORMAT_VERSION,
                algorithm: options.algorithm,
                compression: options.compression,
                zstd_level: options.zstd_level,
                created_at: Utc::now(),
            };
            let json = serde_json::to_vec_pretty(&manifest).map_err(|source| {
                StoreError::Serialization {
                    path: manifest_path.clone(),
                    source,
                }
            })?;
            let written = write_atomic(
                &root.join(TMP_DIR),
                &manifest_path,
                &json,
                WriteOptions {
                    no_clobber: true,
                    ..Default::default()
                },
            )
            .map_err(|source| StoreError::WriteFailed {
                path: manifest_path.clone(),
                source,
            })?;
            if written.outcome == WriteOutcome::AlreadyExists {
                // Another opener created the store first
                read_json(&manifest_path)?
            } else {
                info!(
                    root = %root.display(),
                    algorithm = %manifest.algorithm,
                    compression = %manifest.compression,
                    "created content store"
                );
                manifest
            }
        };

        if !manifest.algorithm.is_cryptographic() {
            warn!(
                root = %root.display(),
                algorithm = %manifest.algorithm,
                "store addresses objects with a non-cryptographic hash"
            );
        }

        Ok(Self {
            root,
            algorithm: manifest.algorithm,
            codec: codec::codec_for(manifest.compression, manifest.zstd_level),
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn compression(&self) -> CompressionKind {
        self.codec.kind()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    pub(crate) fn refs_dir(&self) -> PathBuf {
        self.root.join(REFS_DIR)
    }

    pub(crate) fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    pub(crate) fn gc_lock_path(&self) -> PathBuf {
        self.root.join(GC_LOCK_FILE)
    }

    pub(crate) fn lock_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(LOCKS_DIR).join(format!("{}.lock", hash.digest))
    }

    /// Path of a blob: `objects/<first2>/<rest>`
    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        let (prefix, rest) = hash.shard();
        self.objects_dir().join(prefix).join(rest)
    }

    /// Hash bytes with this store's algorithm
    pub fn hash(&self, bytes: &[u8]) -> ContentHash {
        hash::hash_bytes(self.algorithm, bytes)
    }

    /// External address of a blob, e.g. `doc://sha256/<digest>`
    pub fn uri(&self, hash: &ContentHash) -> String {
        hash.to_uri(&self.options.uri_scheme)
    }

    /// Parse a bare digest, `alg:digest` or `scheme://alg/digest`
    pub fn parse_hash(&self, s: &str) -> Result<ContentHash, StoreError> {
        let parsed = if s.contains("://") {
            ContentHash::parse_uri(s).map(|(_, hash)| hash)
        } else if s.contains(':') {
            ContentHash::parse_prefixed(s)
        } else {
            ContentHash::new(self.algorithm, s)
        };
        let hash = parsed.map_err(|e| StoreError::InvalidHash(format!("{s}: {e}")))?;
        self.check_algorithm(&hash)?;
        Ok(hash)
    }

    fn check_algorithm(&self, hash: &ContentHash) -> Result<(), StoreError> {
        if hash.algorithm != self.algorithm {
            return Err(StoreError::InvalidHash(format!(
                "{} is not a {} hash",
                hash.to_prefixed_string(),
                self.algorithm
            )));
        }
        Ok(())
    }

    /// Store bytes, deduplicating by content hash
    pub fn store(&self, bytes: &[u8]) -> Result<StoreResult, StoreError> {
        let hash = self.hash(bytes);
        let _lock = FileLock::acquire(self.lock_path(&hash))?;
        self.store_locked(&hash, bytes)
    }

    /// Store bytes and append a provenance record for them
    ///
    /// The record is appended whether or not the blob already existed.
    pub fn store_with_provenance(
        &self,
        bytes: &[u8],
        provenance: &Provenance,
    ) -> Result<(StoreResult, ProvenanceRecord), StoreError> {
        let hash = self.hash(bytes);
        let _lock = FileLock::acquire(self.lock_path(&hash))?;
        let result = self.store_locked(&hash, bytes)?;
        let record = self.append_provenance_locked(&hash, provenance)?;
        Ok((result, record))
    }

    /// Check-then-write; caller holds the hash lock
    fn store_locked(&self, hash: &ContentHash, bytes: &[u8]) -> Result<StoreResult, StoreError> {
        let path = self.object_path(hash);
        let size = bytes.len() as u64;

        if path.exists() {
            let reusable = self.dedup_hit(hash, &path, bytes)?;
            if !reusable {
                warn!(hash = %hash, path = %path.display(), "replacing corrupt object");
                self.write_object(&path, bytes, false)?;
            }
            return Ok(StoreResult {
                hash: hash.clone(),
                existed: reusable,
                size,
            });
        }

        let outcome = self.write_object(&path, bytes, true)?;
        let existed = outcome == WriteOutcome::AlreadyExists;
        debug!(hash = %hash, size, existed, "stored object");
        Ok(StoreResult {
            hash: hash.clone(),
            existed,
            size,
        })
    }

    /// Handle an existing object for `hash`
    ///
    /// Returns `Ok(true)` when the object can be reused and `Ok(false)`
    /// when it is corrupt and must be rewritten.
    fn dedup_hit(&self, hash: &ContentHash, path: &Path, bytes: &[u8]) -> Result<bool, StoreError> {
        if self.options.verify_on_dedup {
            let existing = match fs::read(path).map_err(StoreError::from).and_then(|s| self.codec.decode(&s)) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(hash = %hash, error = %e, "existing object unreadable");
                    return Ok(false);
                }
            };
            if existing != bytes {
                let actual = self.hash(&existing);
                if actual != *hash {
                    return Ok(false);
                }
                // Same hash, different bytes
                return Err(StoreError::HashMismatch {
                    path: path.to_path_buf(),
                    expected: hash.to_prefixed_string(),
                    actual: format!("collision with {} stored bytes", existing.len()),
                });
            }
        }

        // Dedup hits count as fresh for the collector's age check
        if let Err(e) = filetime::set_file_mtime(path, FileTime::now()) {
            warn!(hash = %hash, error = %e, "failed to refresh object mtime");
        }
        debug!(hash = %hash, "object already in store");
        Ok(true)
    }

    fn write_object(&self, path: &Path, bytes: &[u8], no_clobber: bool) -> Result<WriteOutcome, StoreError> {
        let encoded = self.codec.encode(bytes)?;
        let written = write_atomic(
            &self.tmp_dir(),
            path,
            &encoded,
            WriteOptions {
                no_clobber,
                mode: Some(0o444),
            },
        )
        .map_err(|source| StoreError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(written.outcome)
    }

    /// Retrieve a blob by hash
    pub fn retrieve(&self, hash: &ContentHash) -> Result<Blob, StoreError> {
        self.check_algorithm(hash)?;
        let path = self.object_path(hash);
        let stored = match fs::read(&path) {
            Ok(stored) => stored,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(hash.to_prefixed_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = self.codec.decode(&stored)?;

        if self.options.verify_on_read
            && let Err(e) = hash::verify_bytes(&bytes, hash)
        {
            warn!(hash = %hash, actual = %e.actual, "object failed verification");
            return Err(StoreError::HashMismatch {
                path,
                expected: e.expected.to_prefixed_string(),
                actual: e.actual.to_prefixed_string(),
            });
        }

        debug!(hash = %hash, size = bytes.len(), "retrieved object");
        let size = bytes.len() as u64;
        Ok(Blob {
            hash: hash.clone(),
            bytes,
            size,
        })
    }

    /// Check whether a blob is present
    pub fn exists(&self, hash: &ContentHash) -> bool {
        hash.algorithm == self.algorithm && self.object_path(hash).is_file()
    }

    pub fn stat(&self, hash: &ContentHash) -> Result<ObjectStat, StoreError> {
        self.check_algorithm(hash)?;
        let path = self.object_path(hash);
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(hash.to_prefixed_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ObjectStat {
            hash: hash.clone(),
            path,
            stored_size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Every blob in the store, sorted by digest
    ///
    /// Files whose path is not a valid digest for this store are skipped.
    pub fn list_objects(&self) -> Result<Vec<ContentHash>, StoreError> {
        let mut hashes = Vec::new();
        for entry in WalkDir::new(self.objects_dir()).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| StoreError::Io(io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(hash) = self.hash_from_object_path(entry.path()) {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    pub(crate) fn hash_from_object_path(&self, path: &Path) -> Option<ContentHash> {
        let rest = path.file_name()?.to_str()?;
        let prefix = path.parent()?.file_name()?.to_str()?;
        ContentHash::new(self.algorithm, format!("{prefix}{rest}")).ok()
    }

    /// Rehash every blob and report those that do not match their name
    pub fn fsck(&self) -> Result<FsckReport, StoreError> {
        let mut report = FsckReport::default();
        for hash in self.list_objects()? {
            report.checked += 1;
            let path = self.object_path(&hash);
            let ok = fs::File::open(&path)
                .map_err(StoreError::from)
                .and_then(|file| self.codec.reader(Box::new(io::BufReader::new(file))))
                .and_then(|mut reader| {
                    hash::hash_reader(self.algorithm, &mut reader).map_err(|e| {
                        StoreError::Codec(format!("decode {}: {e}", path.display()))
                    })
                })
                .map(|actual| actual == hash);
            match ok {
                Ok(true) => {}
                Ok(false) => {
                    warn!(hash = %hash, "fsck: content does not match hash");
                    report.corrupt.push(path);
                }
                Err(e) => {
                    warn!(hash = %hash, error = %e, "fsck: object unreadable");
                    report.corrupt.push(path);
                }
            }
        }
        info!(checked = report.checked, corrupt = report.corrupt.len(), "fsck complete");
        Ok(report)
    }
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|source| StoreError::Serialization {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize>(staging: &Path, path: &Path, value: &T) -> Result<(), StoreError> {
    let mut json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    json.push(b'\n');
    write_atomic(staging, path, &json, WriteOptions::default()).map_err(|source| {
        StoreError::WriteFailed {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(())
}
