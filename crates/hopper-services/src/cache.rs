//! Fingerprint cache of solve results.
//!
//! Entries are keyed by the BLAKE3 hash of the exact request body the
//! transport would send, scoped by solve target. A key that exists always
//! maps to the response that body produced. No TTLs, no eviction; `clear()`
//! is the only way out.
//!
//! Requests carrying inline definition bytes never reach this cache.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use hopper_core::schema::SolveResponse;

/// Fingerprint of one request body against one solve target.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// `scope` separates identical bodies sent to targets that may answer
    /// differently (the server pool vs. a directly addressed server).
    pub fn for_request(scope: &str, body: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(scope.as_bytes());
        hasher.update(&[0]);
        hasher.update(body.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &hex::encode(self.0)[..16])
    }
}

/// In-memory solve cache shared by every definition in the process.
#[derive(Clone, Default)]
pub struct SolveCache {
    entries: Arc<DashMap<CacheKey, Arc<OnceCell<SolveResponse>>>>,
}

impl SolveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<SolveResponse> {
        self.entries
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Store a response, replacing whatever the key held.
    pub fn set(&self, key: CacheKey, response: SolveResponse) {
        let cell = OnceCell::new_with(Some(response));
        self.entries.insert(key, Arc::new(cell));
    }

    pub fn clear(&self) {
        self.entries.clear();
        tracing::debug!("solve cache cleared");
    }

    /// Number of stored responses. Solves still in flight are not counted.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached response for `key`, or run `solve` once to produce
    /// it. Concurrent callers with the same key wait on the first caller
    /// instead of issuing their own request.
    ///
    /// `solve` resolves to the response plus whether it may be stored. A
    /// response that may not be stored is handed back to its own caller
    /// only; a waiting caller then runs its own `solve`.
    pub async fn get_or_solve<F>(&self, key: CacheKey, solve: F) -> SolveResponse
    where
        F: Future<Output = (SolveResponse, bool)>,
    {
        let cell = Arc::clone(&self.entries.entry(key).or_default());

        if let Some(hit) = cell.get() {
            tracing::debug!(key = ?key, "solve cache hit");
            return hit.clone();
        }

        let outcome = cell
            .get_or_try_init(|| async move {
                tracing::debug!(key = ?key, "solve cache miss");
                match solve.await {
                    (response, true) => Ok(response),
                    (response, false) => Err(response),
                }
            })
            .await;

        match outcome {
            Ok(response) => response.clone(),
            Err(uncached) => {
                self.release(key, cell);
                uncached
            }
        }
    }

    /// Drop an empty cell left by an uncacheable solve. A cell some other
    /// caller still holds stays, since that caller may yet fill it.
    fn release(&self, key: CacheKey, cell: Arc<OnceCell<SolveResponse>>) {
        let ours = Arc::as_ptr(&cell);
        drop(cell);
        self.entries.remove_if(&key, |_, held| {
            Arc::as_ptr(held) == ours && Arc::strong_count(held) == 1 && !held.initialized()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn response(tag: &str) -> SolveResponse {
        SolveResponse {
            pointer: Some(tag.to_string()),
            ..SolveResponse::default()
        }
    }

    #[test]
    fn key_depends_on_scope_and_body() {
        let a = CacheKey::for_request("pool", r#"{"x":1}"#);
        let b = CacheKey::for_request("pool", r#"{"x":1}"#);
        let c = CacheKey::for_request("pool", r#"{"x":2}"#);
        let d = CacheKey::for_request("host:80", r#"{"x":1}"#);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.to_string().len(), 64);
    }

    #[test]
    fn get_set_clear() {
        let cache = SolveCache::new();
        let key = CacheKey::for_request("pool", "body");
        assert!(cache.get(&key).is_none());

        cache.set(key, response("one"));
        assert_eq!(cache.get(&key).unwrap().pointer.as_deref(), Some("one"));
        assert_eq!(cache.len(), 1);

        cache.set(key, response("two"));
        assert_eq!(cache.get(&key).unwrap().pointer.as_deref(), Some("two"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn get_or_solve_runs_once_for_concurrent_callers() {
        let cache = SolveCache::new();
        let key = CacheKey::for_request("pool", "same body");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_solve(key, async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        (response("shared"), true)
                    })
                    .await
            }));
        }

        for handle in handles {
            let resp = handle.await.unwrap();
            assert_eq!(resp.pointer.as_deref(), Some("shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn uncacheable_results_are_not_stored() {
        let cache = SolveCache::new();
        let key = CacheKey::for_request("pool", "body");

        let first = cache
            .get_or_solve(key, async { (SolveResponse::failed("boom"), false) })
            .await;
        assert_eq!(first.errors, vec!["boom"]);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());

        let second = cache
            .get_or_solve(key, async { (response("ok"), true) })
            .await;
        assert_eq!(second.pointer.as_deref(), Some("ok"));
        assert_eq!(cache.get(&key).unwrap().pointer.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn waiter_result_is_stored_after_uncacheable_first_solve() {
        let cache = SolveCache::new();
        let key = CacheKey::for_request("pool", "body");

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_solve(key, async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        (SolveResponse::failed("busy"), false)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_solve(key, async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        (response("ok"), true)
                    })
                    .await
            })
        };

        assert_eq!(first.await.unwrap().errors, vec!["busy"]);
        assert_eq!(second.await.unwrap().pointer.as_deref(), Some("ok"));
        assert_eq!(cache.get(&key).unwrap().pointer.as_deref(), Some("ok"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn cached_result_short_circuits_solve() {
        let cache = SolveCache::new();
        let key = CacheKey::for_request("pool", "body");
        cache.set(key, response("stored"));

        let calls = AtomicUsize::new(0);
        let resp = cache
            .get_or_solve(key, async {
                calls.fetch_add(1, Ordering::SeqCst);
                (response("fresh"), true)
            })
            .await;
        assert_eq!(resp.pointer.as_deref(), Some("stored"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
