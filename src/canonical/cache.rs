// src/canonical/cache.rs

//! Caller-owned cache of normalized parts
//!
//! Batches of related documents share most of their parts (styles, themes,
//! settings). A [`CanonicalCache`] remembers the normalized form of a part
//! keyed by its class and the XXH128 of its raw bytes. The cache is owned
//! by the caller and passed into each canonicalize call; there is no
//! process-wide state.
//!
//! A cache is bound to one set of canonicalization options. Using it with a
//! canonicalizer configured differently clears it first.

use std::collections::HashMap;

/// Default number of entries kept before the cache is cleared
pub const DEFAULT_CACHE_ENTRIES: usize = 4096;

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct CanonicalCache {
    entries: HashMap<String, Vec<u8>>,
    fingerprint: Option<String>,
    max_entries: usize,
    hits: u64,
    misses: u64,
}

impl Default for CanonicalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonicalCache {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_CACHE_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            fingerprint: None,
            max_entries: max_entries.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Bind to an options fingerprint, dropping entries made under another
    pub(crate) fn bind(&mut self, fingerprint: &str) {
        if self.fingerprint.as_deref() != Some(fingerprint) {
            self.entries.clear();
            self.fingerprint = Some(fingerprint.to_string());
        }
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub(crate) fn insert(&mut self, key: String, value: Vec<u8>) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.entries.clear();
        }
        self.entries.insert(key, value);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_and_misses() {
        let mut cache = CanonicalCache::new();
        cache.bind("opts");
        assert!(cache.get("k").is_none());
        cache.insert("k".to_string(), b"v".to_vec());
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_rebind_clears() {
        let mut cache = CanonicalCache::new();
        cache.bind("a");
        cache.insert("k".to_string(), b"v".to_vec());
        cache.bind("a");
        assert_eq!(cache.stats().entries, 1);
        cache.bind("b");
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_bounded() {
        let mut cache = CanonicalCache::with_max_entries(2);
        cache.insert("a".to_string(), vec![1]);
        cache.insert("b".to_string(), vec![2]);
        cache.insert("c".to_string(), vec![3]);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get("c"), Some(vec![3]));
    }
}
