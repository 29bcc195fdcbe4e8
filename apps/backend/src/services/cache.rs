//! The three request-path caches: Response Cache, Verified-NZB Cache, and
//! Mount Handle Cache. All three share the same bookkeeping discipline —
//! FIFO eviction by insertion order, a byte-size cap, and a TTL — built on
//! top of `indexmap::IndexMap` so eviction order falls directly out of
//! iteration order rather than a separate queue.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::models::{MountHandle, Release, TriageDecision};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    size_bytes: usize,
}

/// FIFO-evicted, TTL-bounded, size-capped cache. Not single-flight; see
/// [`SingleFlightCache`] and [`MountHandleCache`] for that behavior.
pub struct FifoCache<V> {
    entries: Mutex<IndexMap<String, Entry<V>>>,
    max_entries: usize,
    max_total_bytes: usize,
    ttl: Duration,
}

impl<V: Clone> FifoCache<V> {
    pub fn new(max_entries: usize, max_total_bytes: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            max_entries,
            max_total_bytes,
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let expired = entries.get(key).map(|e| e.inserted_at.elapsed() >= self.ttl).unwrap_or(false);
        if expired {
            entries.shift_remove(key);
            return None;
        }
        entries.get(key).map(|e| e.value.clone())
    }

    /// Rejects the insert outright if a single entry would exceed the
    /// cache's total byte cap; otherwise evicts oldest-first until both
    /// the entry-count and byte-total limits hold.
    pub async fn insert(&self, key: String, value: V, size_bytes: usize) -> bool {
        if size_bytes > self.max_total_bytes {
            return false;
        }
        let mut entries = self.entries.lock().await;
        entries.shift_remove(&key);
        entries.insert(key, Entry { value, inserted_at: Instant::now(), size_bytes });
        self.evict_locked(&mut entries);
        true
    }

    fn evict_locked(&self, entries: &mut IndexMap<String, Entry<V>>) {
        let now = Instant::now();
        while let Some((_, front)) = entries.first() {
            if now.duration_since(front.inserted_at) >= self.ttl {
                entries.shift_remove_index(0);
            } else {
                break;
            }
        }
        while entries.len() > self.max_entries || total_bytes(entries) > self.max_total_bytes {
            if entries.shift_remove_index(0).is_none() {
                break;
            }
        }
    }

    pub async fn flush(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn total_bytes<V>(entries: &IndexMap<String, Entry<V>>) -> usize {
    entries.values().map(|e| e.size_bytes).sum()
}

/// Schema version for [`CachedResponse`]; bump when its shape changes so a
/// stale entry from a previous build can be told apart from a fresh one.
pub const CACHED_RESPONSE_VERSION: u32 = 1;

/// Response Cache: key is the canonical JSON of the request shape. Holds
/// the assembled response payload plus everything needed to resume triage
/// on a partial hit rather than re-dispatching the whole search: the
/// ranked release list triage runs over, the decisions already reached
/// (keyed by download URL), and which download URLs are still pending.
#[derive(Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub version: u32,
    pub stored_at_ms: i64,
    pub payload: serde_json::Value,
    pub triage_complete: bool,
    pub ranked_releases: Vec<Release>,
    pub triage_decisions: std::collections::HashMap<String, TriageDecision>,
    pub pending_download_urls: Vec<String>,
}

pub struct ResponseCache {
    inner: FifoCache<CachedResponse>,
}

impl ResponseCache {
    pub fn new(max_entries: usize, max_total_bytes: usize, ttl: Duration) -> Self {
        Self { inner: FifoCache::new(max_entries, max_total_bytes, ttl) }
    }

    pub async fn get(&self, cache_key: &str) -> Option<CachedResponse> {
        self.inner.get(cache_key).await
    }

    /// Size is estimated by serializing `{payload, meta}` and measuring
    /// its byte length, per the cache tier's bookkeeping discipline.
    pub async fn insert(&self, cache_key: String, response: CachedResponse) -> bool {
        let estimated = serde_json::to_vec(&response).map(|v| v.len()).unwrap_or(usize::MAX);
        self.inner.insert(cache_key, response, estimated).await
    }

    pub async fn flush(&self) {
        self.inner.flush().await;
    }
}

/// Verified-NZB Cache: key is the download URL, value is the raw NZB body.
pub struct VerifiedNzbCache {
    inner: FifoCache<Arc<Vec<u8>>>,
}

impl VerifiedNzbCache {
    pub fn new(max_total_bytes: usize, ttl: Duration) -> Self {
        Self { inner: FifoCache::new(usize::MAX, max_total_bytes, ttl) }
    }

    pub async fn get(&self, download_url: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.get(download_url).await
    }

    pub async fn insert(&self, download_url: String, body: Vec<u8>) -> bool {
        let size = body.len();
        self.inner.insert(download_url, Arc::new(body), size).await
    }

    pub async fn flush(&self) {
        self.inner.flush().await;
    }
}

#[derive(Clone)]
enum MountSlot {
    Pending(Arc<Notify>),
    Ready(MountHandle, Instant),
    Failed(String, Instant),
}

/// Mount Handle Cache: keyed by `(download_url, category, episode)`.
/// Concurrent callers racing the same key await the same in-flight build
/// rather than starting their own; only a *deterministic* downstream
/// failure is pinned for the TTL, a transient one is deleted so the next
/// caller may retry.
pub struct MountHandleCache {
    slots: Mutex<std::collections::HashMap<String, MountSlot>>,
    ttl: Duration,
}

impl MountHandleCache {
    pub fn new(ttl: Duration) -> Self {
        Self { slots: Mutex::new(std::collections::HashMap::new()), ttl }
    }

    pub fn key(download_url: &str, category: &str, episode: Option<(u32, u32)>) -> String {
        match episode {
            Some((s, e)) => format!("{download_url}|{category}|S{s:02}E{e:02}"),
            None => format!("{download_url}|{category}"),
        }
    }

    /// Non-blocking lookup used for the `⚡ Instant` response tag: true
    /// only when a non-expired `ready` mount already exists for `key`.
    pub async fn has_ready(&self, key: &str) -> bool {
        let slots = self.slots.lock().await;
        matches!(slots.get(key), Some(MountSlot::Ready(_, inserted_at)) if inserted_at.elapsed() < self.ttl)
    }

    /// Runs `build` at most once per key; concurrent callers for the same
    /// key await the first caller's result. `is_deterministic_failure`
    /// classifies an error from `build` as pinnable-for-TTL vs retryable.
    pub async fn get_or_build<F, Fut>(
        &self,
        key: &str,
        build: F,
        is_deterministic_failure: impl Fn(&str) -> bool,
    ) -> Result<MountHandle, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MountHandle, String>>,
    {
        loop {
            let notify = {
                let mut slots = self.slots.lock().await;
                match slots.get(key) {
                    Some(MountSlot::Ready(handle, inserted_at)) => {
                        if inserted_at.elapsed() < self.ttl {
                            return Ok(handle.clone());
                        }
                        slots.remove(key);
                        None
                    }
                    Some(MountSlot::Failed(err, inserted_at)) => {
                        if inserted_at.elapsed() < self.ttl {
                            return Err(err.clone());
                        }
                        slots.remove(key);
                        None
                    }
                    Some(MountSlot::Pending(notify)) => Some(Arc::clone(notify)),
                    None => {
                        slots.insert(key.to_string(), MountSlot::Pending(Arc::new(Notify::new())));
                        None
                    }
                }
            };

            if let Some(notify) = notify {
                notify.notified().await;
                continue;
            }

            // This call owns the pending slot: nobody else will build for `key`
            // until we resolve it below.
            let result = build().await;
            let mut slots = self.slots.lock().await;
            let waiter = match slots.remove(key) {
                Some(MountSlot::Pending(notify)) => Some(notify),
                other => {
                    if let Some(slot) = other {
                        slots.insert(key.to_string(), slot);
                    }
                    None
                }
            };

            match &result {
                Ok(handle) => {
                    slots.insert(key.to_string(), MountSlot::Ready(handle.clone(), Instant::now()));
                }
                Err(err) if is_deterministic_failure(err) => {
                    slots.insert(key.to_string(), MountSlot::Failed(err.clone(), Instant::now()));
                }
                Err(_) => {
                    // non-deterministic: leave no entry so the next caller retries
                }
            }
            drop(slots);
            if let Some(notify) = waiter {
                notify.notify_waiters();
            }
            return result;
        }
    }

    pub async fn flush(&self) {
        self.slots.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_cache_rejects_oversized_entry() {
        let cache: FifoCache<String> = FifoCache::new(10, 100, Duration::from_secs(60));
        assert!(!cache.insert("k".into(), "v".into(), 200).await);
    }

    #[tokio::test]
    async fn fifo_cache_evicts_oldest_first_over_entry_cap() {
        let cache: FifoCache<String> = FifoCache::new(2, 10_000, Duration::from_secs(60));
        cache.insert("a".into(), "1".into(), 1).await;
        cache.insert("b".into(), "2".into(), 1).await;
        cache.insert("c".into(), "3".into(), 1).await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn fifo_cache_expires_past_ttl() {
        let cache: FifoCache<String> = FifoCache::new(10, 10_000, Duration::from_millis(10));
        cache.insert("a".into(), "1".into(), 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn mount_handle_cache_concurrent_callers_share_one_build() {
        let cache = Arc::new(MountHandleCache::new(Duration::from_secs(60)));
        let build_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = Arc::clone(&cache);
            let build_count = Arc::clone(&build_count);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build(
                        "key",
                        || async {
                            build_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(MountHandle {
                                status: crate::models::MountStatus::Ready,
                                mount_path: Some("/mnt/x".into()),
                                filename: Some("movie.mkv".into()),
                                file_size: Some(123),
                                error: None,
                            })
                        },
                        |_| false,
                    )
                    .await
            }));
        }

        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(build_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mount_handle_cache_deterministic_failure_is_pinned() {
        let cache = MountHandleCache::new(Duration::from_secs(60));
        let result = cache
            .get_or_build("key", || async { Err("no-video-found".to_string()) }, |_| true)
            .await;
        assert!(result.is_err());
        let second = cache
            .get_or_build("key", || async { Ok(unreachable_handle()) }, |_| true)
            .await;
        assert_eq!(second.unwrap_err(), "no-video-found");
    }

    fn unreachable_handle() -> MountHandle {
        panic!("build should not run; failure was pinned")
    }
}
