//! Result cache with request coalescing.
//!
//! Keys are fingerprints of `(source_id, query_text)`; the source id is kept
//! as a plain prefix so a whole source can be invalidated without knowing
//! which queries hit it. Identical concurrent misses share one in-flight
//! computation: the first caller becomes the leader and runs the fetch, every
//! later caller awaits a clone of the same [`Shared`] future. Failures fan
//! out to all waiters, which is why the fetch error type is `Clone`.
//!
//! One mutex guards both maps so check-then-act over "cached? pending?" is a
//! single atomic step. The lock is never held across an await.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::dispatch::{DispatchError, FetchOutcome, FetchResult};

/// Cache key for a query against a source: `{source_id}:{blake3(query)}`.
///
/// Hashing only the query text keeps the source id greppable in the key,
/// which [`ResultCache::clear`] relies on for prefix invalidation.
pub fn fingerprint(source_id: &str, query_text: &str) -> String {
    format!(
        "{source_id}:{}",
        blake3::hash(query_text.as_bytes()).to_hex()
    )
}

type SharedFetch = Shared<BoxFuture<'static, Result<FetchOutcome, DispatchError>>>;

/// How a [`ResultCache::get_or_compute`] call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a completed cached entry.
    Hit,
    /// This caller ran the computation.
    Computed,
    /// Attached to another caller's in-flight computation.
    Coalesced,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: FetchResult,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    pending: HashMap<String, SharedFetch>,
}

/// In-memory fetch-result cache with single-flight semantics.
///
/// Only non-empty results are stored: an empty row set is always recomputed,
/// so a transiently empty source does not pin an empty answer.
#[derive(Default)]
pub struct ResultCache {
    inner: Arc<Mutex<Inner>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    // The cache stays usable if a holder panicked; both maps remain
    // internally consistent under any interleaving of lock holders.
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Completed cached result for `key`, if any.
    pub fn get(&self, key: &str) -> Option<FetchResult> {
        self.lock().entries.get(key).map(|e| e.result.clone())
    }

    /// Store a completed result. Empty results are ignored.
    pub fn put(&self, key: impl Into<String>, result: FetchResult) {
        if result.is_empty() {
            return;
        }
        self.lock().entries.insert(
            key.into(),
            CacheEntry {
                result,
                created_at: Utc::now(),
            },
        );
    }

    /// Number of completed entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop completed entries. `Some(source_id)` drops only that source's
    /// keys; `None` drops everything. In-flight computations are untouched
    /// and will still publish when they complete.
    pub fn clear(&self, source_id: Option<&str>) {
        let mut inner = self.lock();
        match source_id {
            Some(id) => {
                let prefix = format!("{id}:");
                inner.entries.retain(|k, _| !k.starts_with(&prefix));
            }
            None => inner.entries.clear(),
        }
    }

    /// Most recently cached result for a source, regardless of query.
    ///
    /// Restyle requests ("make it a pie chart") carry different query text
    /// than the fetch that populated the cache, so their fingerprints never
    /// match; this recovers the data they should reuse. Timestamp ties break
    /// on the key, so the pick is stable across map iteration orders.
    pub fn latest_for_source(&self, source_id: &str) -> Option<FetchResult> {
        let prefix = format!("{source_id}:");
        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .max_by_key(|(k, e)| (e.created_at, k.as_str()))
            .map(|(_, e)| e.result.clone())
    }

    /// Return the cached result for `key`, or run `compute` exactly once
    /// across all concurrent callers and share its outcome.
    ///
    /// `compute` is only invoked if this caller wins the race to become the
    /// leader; coalesced callers drop theirs unused. Settlement is the one
    /// publication point: the shared future itself removes the pending entry
    /// and caches a non-empty success before it resolves, so waiters that
    /// wake late never touch the maps and cannot undo an intervening
    /// [`clear`](Self::clear).
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> (Result<FetchOutcome, DispatchError>, CacheStatus)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<FetchOutcome, DispatchError>> + Send + 'static,
    {
        let (shared, status) = {
            let mut inner = self.lock();
            if let Some(entry) = inner.entries.get(key) {
                return (
                    Ok(FetchOutcome {
                        result: entry.result.clone(),
                        messages: Vec::new(),
                    }),
                    CacheStatus::Hit,
                );
            }
            if let Some(existing) = inner.pending.get(key) {
                (existing.clone(), CacheStatus::Coalesced)
            } else {
                // At most one pending per key exists, and only the future
                // below removes it, so the unconditional remove at settlement
                // always drops its own registration.
                let maps = Arc::clone(&self.inner);
                let owned_key = key.to_string();
                let shared: SharedFetch = async move {
                    let outcome = compute().await;
                    let mut inner = maps.lock().unwrap_or_else(PoisonError::into_inner);
                    inner.pending.remove(&owned_key);
                    if let Ok(ref outcome) = outcome {
                        if !outcome.result.is_empty() {
                            inner.entries.insert(
                                owned_key,
                                CacheEntry {
                                    result: outcome.result.clone(),
                                    created_at: Utc::now(),
                                },
                            );
                        }
                    }
                    outcome
                }
                .boxed()
                .shared();
                inner.pending.insert(key.to_string(), shared.clone());
                (shared, CacheStatus::Computed)
            }
        };

        (shared.await, status)
    }
}
