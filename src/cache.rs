use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;

use crate::error::SyncError;

/// Cache key: endpoint plus a normalized (sorted) parameter tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn endpoint(endpoint: &str) -> Self {
        Self(endpoint.to_string())
    }

    /// Parameters are sorted by name so call sites may pass them in any order.
    pub fn with_params(endpoint: &str, params: &[(&str, String)]) -> Self {
        if params.is_empty() {
            return Self::endpoint(endpoint);
        }
        let mut sorted: Vec<_> = params.iter().collect();
        sorted.sort();
        let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Self(format!("{endpoint}::({})", rendered.join(", ")))
    }

    /// Key for an API path such as `get_cases/1&suite_id=2&limit=250`:
    /// everything before the first `&` is the endpoint, the rest are params.
    pub fn from_path(path: &str) -> Self {
        let mut parts = path.split('&');
        let endpoint = parts.next().unwrap_or_default();
        let params: Vec<(&str, String)> = parts
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k, v.to_string()),
                None => (p, String::new()),
            })
            .collect();
        Self::with_params(endpoint, &params)
    }

    /// Key for the concatenated items of a paginated collection. Kept apart
    /// from the single-page key of the same path.
    pub fn collection(path: &str, items_key: &str) -> Self {
        Self(format!("collection::{}[{items_key}]", Self::from_path(path).0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    /// Percentage of lookups served from cache (0.0 when nothing was looked up).
    pub hit_rate: f64,
}

struct Inner<V> {
    entries: HashMap<CacheKey, V>,
    /// Insertion order, oldest first.
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

/// Session-scoped response cache.
///
/// - Only successful fetches are stored; errors are returned but never cached.
/// - Bounded by `max_size` with FIFO eviction of the oldest inserted key.
/// - All access goes through one mutex, never held across a fetch. Two callers
///   missing the same key concurrently will both fetch.
pub struct ResponseCache<V = Value> {
    max_size: usize,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    // Each critical section below leaves entries and order consistent, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up a key, counting the hit or miss.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut inner = self.lock();
        match inner.entries.get(key).cloned() {
            Some(v) => {
                inner.hits += 1;
                Some(v)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a value. A new key evicts the oldest entry when full; an existing
    /// key has its value replaced and moves to the back of the queue.
    pub fn insert(&self, key: CacheKey, value: V) {
        let mut inner = self.lock();
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        } else {
            while inner.entries.len() >= self.max_size {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
                tracing::trace!(key = %oldest, "cache evicted oldest entry");
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, value);
    }

    /// Return the cached value, or run `fetch` and cache its `Ok` result.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        force_refresh: bool,
        fetch: F,
    ) -> Result<V, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SyncError>>,
    {
        if !force_refresh && let Some(cached) = self.get(key) {
            tracing::trace!(key = %key, "cache hit");
            return Ok(cached);
        }

        let fresh = fetch().await;
        if let Ok(value) = &fresh {
            self.insert(key.clone(), value.clone());
        }
        fresh
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.order.retain(|k| k != key);
        }
        removed
    }

    /// Remove every key containing `pattern`; returns how many were removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|k, _| !k.as_str().contains(pattern));
        inner.order.retain(|k| !k.as_str().contains(pattern));
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(pattern, removed, "cache entries invalidated");
        }
        removed
    }

    /// Drop every entry but keep the counters.
    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            inner.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            hit_rate,
        }
    }
}
