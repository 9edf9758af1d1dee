//! Weight-bounded result cache for read, diff and history operations.
//!
//! Results are keyed by a [`Fingerprint`]: the repository instance identity
//! (a per-instance UUID, so re-created or renamed repositories can never
//! resurrect stale entries), the operation kind, the absolute revision(s)
//! and the pattern/query text. Fingerprints only ever carry absolute
//! revisions — callers resolve `HEAD` first — so entries are immutable facts
//! about content-addressed state and never go stale on commit.
//!
//! A striped lock keyed by fingerprint guarantees at most one concurrent
//! computation per fingerprint: a second caller awaits the stripe and then
//! finds the first caller's result. Failed computations leave nothing
//! behind.

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru_mem::{HeapSize, LruCache};
use uuid::Uuid;

use crate::config::{CacheConfig, parse_size};
use crate::errors::DogmaError;

mod weight;
pub use weight::json_weight;

/// Types that can report the weight they contribute to the cache: content
/// bytes plus path/query string lengths.
pub trait CacheWeight {
    fn cache_weight(&self) -> usize;
}

/// The operation part of a fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Find {
        revision: i64,
        pattern: String,
        max_entries: Option<usize>,
    },
    List {
        revision: i64,
        pattern: String,
        max_entries: Option<usize>,
    },
    Query {
        revision: i64,
        query: String,
    },
    Diff {
        from: i64,
        to: i64,
        pattern: String,
    },
    DiffQuery {
        from: i64,
        to: i64,
        query: String,
    },
    History {
        from: i64,
        to: i64,
        pattern: String,
        max_commits: usize,
    },
}

impl Operation {
    fn text_len(&self) -> usize {
        match self {
            Operation::Find { pattern, .. } | Operation::List { pattern, .. } => pattern.len(),
            Operation::Query { query, .. } => query.len(),
            Operation::Diff { pattern, .. } => pattern.len(),
            Operation::DiffQuery { query, .. } => query.len(),
            Operation::History { pattern, .. } => pattern.len(),
        }
    }
}

/// Identity of one cached computation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub repo: Uuid,
    pub op: Operation,
}

impl HeapSize for Fingerprint {
    fn heap_size(&self) -> usize {
        self.op.text_len()
    }
}

struct CachedResult {
    value: Arc<dyn Any + Send + Sync>,
    weight: usize,
}

impl HeapSize for CachedResult {
    fn heap_size(&self) -> usize {
        self.weight
    }
}

/// Counters exposed by [`ResultCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
    pub entries: usize,
    pub current_weight: usize,
    pub max_weight: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The process-wide result cache.
pub struct ResultCache {
    entries: Mutex<LruCache<Fingerprint, CachedResult>>,
    stripes: Vec<tokio::sync::Mutex<()>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    /// Build a cache from configuration; falls back to defaults on an
    /// unparsable weight string.
    pub fn from_config(config: &CacheConfig) -> ResultCache {
        let max_weight = parse_size(&config.max_weight)
            .unwrap_or_else(|| parse_size(&CacheConfig::default().max_weight).unwrap());
        ResultCache::new(max_weight, config.stripes.max(1))
    }

    pub fn new(max_weight: usize, stripes: usize) -> ResultCache {
        ResultCache {
            entries: Mutex::new(LruCache::new(max_weight)),
            stripes: (0..stripes).map(|_| tokio::sync::Mutex::new(())).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn stripe_of(&self, fingerprint: &Fingerprint) -> &tokio::sync::Mutex<()> {
        let mut hasher = ahash::AHasher::default();
        fingerprint.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % self.stripes.len()]
    }

    fn lookup<T: Send + Sync + 'static>(&self, fingerprint: &Fingerprint) -> Option<Arc<T>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries
            .get(fingerprint)
            .and_then(|cached| cached.value.clone().downcast::<T>().ok())
    }

    fn store<T: Send + Sync + 'static>(&self, fingerprint: Fingerprint, value: Arc<T>, weight: usize) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let len_before = entries.len();
        let cached = CachedResult { value, weight };
        match entries.insert(fingerprint, cached) {
            Ok(_) => {
                let evicted = (len_before + 1).saturating_sub(entries.len());
                if evicted > 0 {
                    self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                }
            }
            Err(e) => {
                // A single result heavier than the whole cache is not cached.
                tracing::debug!(weight, error = %e, "cache entry rejected");
            }
        }
    }

    /// Fetch the result for `fingerprint`, computing it with `load` on miss.
    ///
    /// At most one `load` runs per fingerprint at any time; racing callers
    /// await the stripe lock and then hit the freshly stored value. A failed
    /// `load` caches nothing and the error propagates to every caller that
    /// reached it.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        fingerprint: Fingerprint,
        load: F,
    ) -> Result<Arc<T>, DogmaError>
    where
        T: CacheWeight + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DogmaError>>,
    {
        if let Some(value) = self.lookup::<T>(&fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        let _stripe = self.stripe_of(&fingerprint).lock().await;
        if let Some(value) = self.lookup::<T>(&fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = Arc::new(load().await?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        let weight = value.cache_weight();
        self.store(fingerprint, value.clone(), weight);
        Ok(value)
    }

    /// Drop every entry, e.g. on shutdown.
    pub fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().expect("cache lock poisoned");
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: entries.len(),
            current_weight: entries.current_size(),
            max_weight: entries.max_size(),
        }
    }
}
