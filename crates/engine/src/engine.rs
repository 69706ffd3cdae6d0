use std::path::{Path, PathBuf};
use std::sync::Arc;

use kolet_core::{AggregationQuery, CancelToken, ResultTable};
use kolet_store::{Reader, Store, StoreConfig};
use parking_lot::Mutex;

use crate::aggregate::{aggregate, MeasureKinds};
use crate::cache::{CacheKey, CacheStats, QueryCache};
use crate::error::EngineError;

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Evaluates aggregation queries against store snapshots and caches the
/// results by (query signature, revision).
///
/// `evaluate` takes `&self`; each call opens its own read connection, so the
/// engine can be shared behind an `Arc` while a writer ingests.
pub struct AggregationEngine {
    store_path: PathBuf,
    store_config: StoreConfig,
    measure_kinds: MeasureKinds,
    cache: Mutex<QueryCache>,
}

impl AggregationEngine {
    pub fn new(store_path: &Path, store_config: StoreConfig, cache_capacity: usize) -> Self {
        Self {
            store_path: store_path.to_path_buf(),
            store_config,
            measure_kinds: MeasureKinds::new(),
            cache: Mutex::new(QueryCache::new(cache_capacity)),
        }
    }

    /// Engine reading the database `store` writes to.
    pub fn for_store(store: &Store, cache_capacity: usize) -> Self {
        Self::new(store.path(), store.config().clone(), cache_capacity)
    }

    /// Declared measure kinds; integer measures keep integer sums.
    pub fn with_measure_kinds(mut self, kinds: MeasureKinds) -> Self {
        self.measure_kinds = kinds;
        self
    }

    pub fn measure_kinds(&self) -> &MeasureKinds {
        &self.measure_kinds
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn evaluate(&self, query: &AggregationQuery, cancel: &CancelToken) -> Result<Arc<ResultTable>, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut reader = Reader::open(&self.store_path, &self.store_config)?;
        let snapshot = reader.snapshot()?;
        let key = CacheKey::new(query, snapshot.revision())?;

        {
            let mut cache = self.cache.lock();
            let dropped = cache.evict_stale(key.revision());
            if dropped > 0 {
                log::debug!("dropped {dropped} cached result(s) older than revision {}", key.revision());
            }
            if let Some(table) = cache.get(&key) {
                log::debug!("cache hit {} at revision {}", key.signature(), key.revision());
                return Ok(table);
            }
        }
        log::debug!("cache miss {} at revision {}", key.signature(), key.revision());

        let mut cursor = snapshot.scan(&query.filter)?;
        let table = aggregate(
            query,
            &self.measure_kinds,
            cursor.records()?,
            snapshot.revision(),
            cancel,
        )?;
        let table = Arc::new(table);
        self.cache.lock().insert(key, Arc::clone(&table));
        Ok(table)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
