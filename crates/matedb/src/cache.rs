//! Type-keyed metadata cache using [`moka`].
//!
//! Each [`SchemaCache`] maps a mapped type's [`TypeId`] to its derived
//! metadata behind an `Arc`. Lookups go through
//! [`SchemaCache::get_or_derive`], which relies on moka's per-key init
//! coalescing: concurrent first requests for one type run the derivation
//! once and all observe the same `Arc`. A failed derivation caches
//! nothing.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    derivations: AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            derivations: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_derivation(&self) {
        self.derivations.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found no entry. Concurrent misses on the same type
    /// may count more than once while still deriving only once.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Derivations actually run, successful or not.
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses).
    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate as a value between 0.0 and 1.0 (returns 0.0 if no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.derivations.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} derivations={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.derivations(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── schema cache ─────────────────────────────────────────────────────

/// Memoizing, type-keyed cache of derived metadata.
///
/// Unbounded and without expiry: entries live until
/// [`invalidate`](Self::invalidate) or [`invalidate_all`](Self::invalidate_all).
pub struct SchemaCache<M> {
    name: &'static str,
    inner: Cache<TypeId, Arc<M>>,
    stats: Arc<CacheStats>,
}

impl<M> Clone for SchemaCache<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<M> SchemaCache<M>
where
    M: Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        debug!(name, "schema cache created");
        Self {
            name,
            inner: Cache::builder().build(),
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Return the cached entry for `key`, deriving it with `derive` on a
    /// miss.
    ///
    /// Concurrent callers for the same key wait for a single derivation.
    /// On failure the error is returned to the caller that ran the
    /// derivation and nothing is stored.
    pub fn get_or_derive<F>(&self, key: TypeId, entity: &str, derive: F) -> StorageResult<Arc<M>>
    where
        F: FnOnce() -> StorageResult<M>,
    {
        if let Some(cached) = self.inner.get(&key) {
            self.stats.record_hit();
            return Ok(cached);
        }
        self.stats.record_miss();

        self.inner
            .try_get_with(key, || {
                self.stats.record_derivation();
                debug!(cache = self.name, entity, "deriving metadata");
                derive().map(Arc::new)
            })
            .map_err(|shared: Arc<StorageError>| match Arc::try_unwrap(shared) {
                Ok(err) => err,
                Err(shared) => StorageError::schema(entity, shared.to_string()),
            })
    }

    pub fn get(&self, key: TypeId) -> Option<Arc<M>> {
        self.inner.get(&key)
    }

    pub fn contains(&self, key: TypeId) -> bool {
        self.inner.contains_key(&key)
    }

    /// Evict one entry.
    pub fn invalidate(&self, key: TypeId) {
        self.inner.invalidate(&key);
        debug!(cache = self.name, "cache invalidate");
    }

    /// Evict every entry.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
        debug!(cache = self.name, "cache invalidate_all");
    }

    /// Snapshot of the currently cached entries.
    pub fn values(&self) -> Vec<Arc<M>> {
        self.inner.iter().map(|(_, value)| value).collect()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

// ── tests ────────────────────────────────────────────────────────────
