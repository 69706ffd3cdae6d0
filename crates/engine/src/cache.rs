use std::num::NonZeroUsize;
use std::sync::Arc;

use kolet_core::{AggregationQuery, ResultTable};
use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Query signature plus the store revision the result was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    signature: String,
    revision: u64,
}

impl CacheKey {
    pub fn new(query: &AggregationQuery, revision: u64) -> Result<Self, EngineError> {
        let canonical = query
            .canonical_json()
            .map_err(|e| EngineError::Signature { reason: e.to_string() })?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(Self {
            signature: format!("sha256:{digest:x}"),
            revision,
        })
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Bounded result cache. Entries are shared, never copied out.
pub struct QueryCache {
    entries: LruCache<CacheKey, Arc<ResultTable>>,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
        }
    }

    /// Drop every entry computed before `revision`. Returns how many went.
    pub fn evict_stale(&mut self, revision: u64) -> usize {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.revision < revision)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        stale.len()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<ResultTable>> {
        match self.entries.get(key) {
            Some(table) => {
                self.hits += 1;
                Some(Arc::clone(table))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, table: Arc<ResultTable>) {
        self.entries.put(key, table);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
            capacity: self.entries.cap().get(),
        }
    }
}
