// src/hash.rs

//! Hashing for content addressing
//!
//! Two algorithms are supported:
//! - **SHA-256** (default): cryptographic, used for content identity
//! - **XXH128**: fast non-cryptographic hash, used for cache keys
//!
//! A [`ContentHash`] pairs an algorithm with its hex digest. It can be
//! rendered three ways: bare digest (`Display`), prefixed
//! (`sha256:<digest>`) and as a URI (`doc://sha256/<digest>`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use thiserror::Error;
use xxhash_rust::xxh3::{xxh3_128, Xxh3};

/// Default URI scheme used when addressing artifacts externally
pub const DEFAULT_URI_SCHEME: &str = "doc";

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit cryptographic hash)
    #[default]
    Sha256,

    /// XXH128 (128-bit non-cryptographic hash)
    ///
    /// Only suitable where collisions are not adversarial, such as
    /// in-process cache keys.
    Xxh128,
}

impl HashAlgorithm {
    /// Hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Xxh128 => 16,
        }
    }

    /// Hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Xxh128 => "xxh128",
        }
    }

    #[inline]
    pub const fn is_cryptographic(&self) -> bool {
        match self {
            Self::Sha256 => true,
            Self::Xxh128 => false,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "xxh128" | "xxhash" | "xxh3" => Ok(Self::Xxh128),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid hash length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid hex in hash: {0}")]
    InvalidHex(String),

    #[error("invalid hash URI: {0}")]
    InvalidUri(String),
}

/// An `(algorithm, digest)` pair identifying a byte sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash {
    pub algorithm: HashAlgorithm,
    /// Lower-case hex digest
    pub digest: String,
}

impl ContentHash {
    /// Create a validated hash value
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Result<Self, HashError> {
        let digest = digest.into();
        let expected_len = algorithm.hex_len();

        if digest.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: digest.len(),
            });
        }

        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(digest));
        }

        Ok(Self {
            algorithm,
            digest: digest.to_lowercase(),
        })
    }

    fn new_unchecked(algorithm: HashAlgorithm, digest: String) -> Self {
        Self { algorithm, digest }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.digest
    }

    /// Parse `sha256:<digest>`; an unprefixed digest is taken as SHA-256
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        match s.split_once(':') {
            Some((algo, digest)) => Self::new(algo.parse()?, digest),
            None => Self::new(HashAlgorithm::Sha256, s),
        }
    }

    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.digest)
    }

    /// Render as `<scheme>://<algorithm>/<digest>`
    pub fn to_uri(&self, scheme: &str) -> String {
        format!("{}://{}/{}", scheme, self.algorithm.name(), self.digest)
    }

    /// Parse a `<scheme>://<algorithm>/<digest>` URI, returning the scheme too
    pub fn parse_uri(uri: &str) -> Result<(String, Self), HashError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| HashError::InvalidUri(uri.to_string()))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.') {
            return Err(HashError::InvalidUri(uri.to_string()));
        }
        let (algo, digest) = rest
            .split_once('/')
            .ok_or_else(|| HashError::InvalidUri(uri.to_string()))?;
        let hash = Self::new(algo.parse()?, digest)?;
        Ok((scheme.to_string(), hash))
    }

    /// Split the digest into a shard prefix and the remainder
    ///
    /// `abcdef...` -> (`ab`, `cdef...`)
    pub fn shard(&self) -> (&str, &str) {
        self.digest.split_at(2.min(self.digest.len()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest)
    }
}

/// Streaming hasher for any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Xxh128(Box<Xxh3>),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Box::new(Xxh3::new())),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Xxh128(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> ContentHash {
        let digest = match self.state {
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Xxh128(hasher) => format!("{:032x}", hasher.digest128()),
        };
        ContentHash::new_unchecked(self.algorithm, digest)
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compute the hash of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> ContentHash {
    let digest = match algorithm {
        HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        HashAlgorithm::Xxh128 => format!("{:032x}", xxh3_128(data)),
    };
    ContentHash::new_unchecked(algorithm, digest)
}

/// Hash everything a reader yields, in fixed-size chunks
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<ContentHash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).digest
}

#[inline]
pub fn xxh128(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Xxh128, data).digest
}

/// Bytes whose hash differs from the one they were addressed by
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{expected} does not match content hash {actual}")]
pub struct VerifyError {
    pub expected: ContentHash,
    pub actual: ContentHash,
}

/// Check that `data` hashes to `expected` under `expected.algorithm`
///
/// ```
/// use canonstore::hash::{hash_bytes, verify_bytes, HashAlgorithm};
///
/// let expected = hash_bytes(HashAlgorithm::Sha256, b"report");
/// assert!(verify_bytes(b"report", &expected).is_ok());
/// assert!(verify_bytes(b"rep0rt", &expected).is_err());
/// ```
pub fn verify_bytes(data: &[u8], expected: &ContentHash) -> Result<(), VerifyError> {
    let actual = hash_bytes(expected.algorithm, data);
    if actual == *expected {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.clone(),
            actual,
        })
    }
}
