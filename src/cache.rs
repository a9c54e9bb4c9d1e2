//! Process-wide memoization with at-most-once computation per key.
//!
//! [`CacheLayer`] outlives individual pipeline runs and is shared between
//! them. Its contract: for a given key, the compute closure executes at most
//! once among all concurrent callers that observe a miss; every other caller
//! racing that key parks until the computation settles and then receives the
//! same value, or the same propagated [`CacheError::ComputationFailed`].
//! Failed computations are never stored, so the next caller after a failure
//! retries instead of hitting a permanently poisoned key.
//!
//! Each entry moves through three states: absent, pending (an in-flight
//! per-key slot exists), and ready. Pending returns to absent on failure, and
//! ready returns to absent when its TTL lapses (checked lazily on access).
//! The in-flight slot is per key, so unrelated keys never serialize behind a
//! global lock across a computation.

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Error type accepted from compute closures.
pub type ComputeError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`CacheLayer::get_or_compute`].
///
/// `Clone` so one in-flight failure can be handed to every concurrent waiter.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum CacheError {
    /// The compute closure for a cold key failed. Nothing was stored; a later
    /// call for the same key will recompute.
    #[error("computation for cache key \"{key}\" failed: {message}")]
    #[diagnostic(
        code(promptloom::cache::computation_failed),
        help("The failure is not cached; retrying the operation reruns the computation.")
    )]
    ComputationFailed { key: String, message: String },
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Option<Duration>,
    last_access: Instant,
}

impl CacheEntry {
    fn expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.stored_at) >= ttl,
            None => false,
        }
    }
}

/// In-flight computation slot for one cold key. Shared by every caller racing
/// that key; the embedded cell settles exactly once.
struct Flight {
    cell: OnceCell<Result<Value, CacheError>>,
}

/// Thread-safe, process-wide memoization layer.
///
/// # Examples
///
/// ```rust,no_run
/// use promptloom::cache::CacheLayer;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), promptloom::cache::CacheError> {
/// let cache = CacheLayer::new(None);
/// let rules = cache
///     .get_or_compute("rules:ESS", None, || async { Ok(json!(["rule-1", "rule-2"])) })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct CacheLayer {
    entries: Mutex<FxHashMap<String, CacheEntry>>,
    flights: Mutex<FxHashMap<String, Arc<Flight>>>,
    max_entries: Option<usize>,
}

impl CacheLayer {
    /// Create a cache, optionally bounded to `max_entries` values with
    /// least-recently-used eviction. A bound of zero is treated as one.
    #[must_use]
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            flights: Mutex::new(FxHashMap::default()),
            max_entries: max_entries.map(|n| n.max(1)),
        }
    }

    /// Return the cached value for `key`, computing it at most once across all
    /// concurrent callers on a miss.
    ///
    /// `ttl = None` means process lifetime. The winner of a cold key runs
    /// `compute` with the per-key slot held, re-checks the store first
    /// (another caller may have finished between the miss and slot
    /// acquisition), and stores only on success.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ComputeError>>,
    {
        if let Some(value) = self.lookup(key) {
            return Ok(value);
        }

        let flight = self.flight(key);
        let result = flight
            .cell
            .get_or_init(|| async {
                // Double-check under the slot: the miss above was unguarded.
                if let Some(value) = self.lookup(key) {
                    return Ok(value);
                }
                tracing::debug!(key, "cache miss, computing");
                match compute().await {
                    Ok(value) => {
                        self.store(key, value.clone(), ttl);
                        Ok(value)
                    }
                    Err(source) => {
                        tracing::warn!(key, error = %source, "cache computation failed");
                        Err(CacheError::ComputationFailed {
                            key: key.to_string(),
                            message: source.to_string(),
                        })
                    }
                }
            })
            .await
            .clone();

        self.retire_flight(key, &flight);
        result
    }

    /// Drop a key so the next access recomputes.
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Number of stored (possibly expired, not yet collected) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Fresh-hit lookup: expired entries are collected here, live ones have
    /// their recency updated for the LRU bound.
    fn lookup(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.expired(now) => {
                tracing::debug!(key, "cache entry expired");
                entries.remove(key);
                None
            }
            Some(entry) => {
                entry.last_access = now;
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    fn store(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                ttl,
                last_access: now,
            },
        );
        if let Some(cap) = self.max_entries {
            while entries.len() > cap {
                let lru = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_access)
                    .map(|(k, _)| k.clone());
                match lru {
                    Some(evicted) => {
                        tracing::debug!(key = %evicted, "evicting least-recently-used entry");
                        entries.remove(&evicted);
                    }
                    None => break,
                }
            }
        }
    }

    /// Get or lazily create the in-flight slot for `key`.
    fn flight(&self, key: &str) -> Arc<Flight> {
        let mut flights = self.flights.lock();
        flights
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Flight {
                    cell: OnceCell::new(),
                })
            })
            .clone()
    }

    /// Remove the slot once its computation settled, so a failure is retried
    /// by the next caller rather than replayed forever.
    fn retire_flight(&self, key: &str, flight: &Arc<Flight>) {
        let mut flights = self.flights.lock();
        if let Some(current) = flights.get(key) {
            if Arc::ptr_eq(current, flight) {
                flights.remove(key);
            }
        }
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn hit_skips_computation() {
        let cache = CacheLayer::new(None);
        let first = cache
            .get_or_compute("k", None, || async { Ok(json!(1)) })
            .await
            .unwrap();
        let second = cache
            .get_or_compute("k", None, || async {
                panic!("compute must not run on a hit")
            })
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let cache = CacheLayer::new(None);
        let err = cache
            .get_or_compute("k", None, || async { Err("boom".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ComputationFailed { .. }));

        let value = cache
            .get_or_compute("k", None, || async { Ok(json!("recovered")) })
            .await
            .unwrap();
        assert_eq!(value, json!("recovered"));
    }

    #[tokio::test]
    async fn ttl_expiry_recomputes() {
        let cache = CacheLayer::new(None);
        cache
            .get_or_compute("k", Some(Duration::from_millis(10)), || async {
                Ok(json!("v1"))
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        let value = cache
            .get_or_compute("k", None, || async { Ok(json!("v2")) })
            .await
            .unwrap();
        assert_eq!(value, json!("v2"));
    }

    #[tokio::test]
    async fn lru_bound_evicts_oldest_access() {
        let cache = CacheLayer::new(Some(2));
        cache
            .get_or_compute("a", None, || async { Ok(json!("a")) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache
            .get_or_compute("b", None, || async { Ok(json!("b")) })
            .await
            .unwrap();
        // Touch "a" so "b" becomes the eviction candidate.
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache
            .get_or_compute("a", None, || async { Ok(json!("never")) })
            .await
            .unwrap();
        cache
            .get_or_compute("c", None, || async { Ok(json!("c")) })
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        let a = cache
            .get_or_compute("a", None, || async { Ok(json!("recomputed")) })
            .await
            .unwrap();
        assert_eq!(a, json!("a"));
    }
}
