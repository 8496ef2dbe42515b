//! In-memory thumbnail cache with request collapsing.
//!
//! Each key maps to one shared, memoized computation. Callers for the same
//! key and version all observe that computation instead of starting their
//! own. The map's shard lock is held only while an entry is looked up or
//! replaced, never while a preview is computed.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use mediagate_common::MediaItemId;

use super::preview::Preview;

type SharedPreview = Shared<BoxFuture<'static, Option<Arc<Preview>>>>;

/// Identity of a cached preview.
///
/// Versions are per item, so an entry is scoped to the item as well as to
/// the content fingerprint; renaming the source keeps the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewKey {
    pub item_id: MediaItemId,
    pub fingerprint: String,
}

impl PreviewKey {
    pub fn new(item_id: MediaItemId, fingerprint: impl Into<String>) -> Self {
        Self {
            item_id,
            fingerprint: fingerprint.into(),
        }
    }
}

impl std::fmt::Display for PreviewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.item_id, self.fingerprint)
    }
}

/// Entry in the thumbnail cache.
struct CacheEntry {
    version: i64,
    preview: SharedPreview,
}

/// Non-blocking view of a cache entry.
#[derive(Debug, Clone)]
pub enum Lookup {
    Ready(Arc<Preview>),
    Loading,
    /// Computation failed for this version; show a placeholder.
    Failed,
}

impl Lookup {
    /// `(preview, is_loading)`.
    pub fn into_parts(self) -> (Option<Arc<Preview>>, bool) {
        match self {
            Self::Ready(preview) => (Some(preview), false),
            Self::Loading => (None, true),
            Self::Failed => (None, false),
        }
    }
}

/// Thread-safe cache of computed previews.
#[derive(Default)]
pub struct ThumbnailCache {
    entries: DashMap<PreviewKey, CacheEntry>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a preview, starting its computation if needed.
    ///
    /// Returns immediately. A computation is started only when there is no
    /// entry for the fingerprint or the entry is for an older version; the
    /// computation runs on the runtime whether or not anyone awaits it.
    pub fn get_or_compute<F, Fut>(&self, key: &PreviewKey, version: i64, compute: F) -> Lookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Preview, String>> + Send + 'static,
    {
        let shared = self.shared(key, version, compute);
        match shared.peek() {
            Some(Some(preview)) => Lookup::Ready(preview.clone()),
            Some(None) => Lookup::Failed,
            None => Lookup::Loading,
        }
    }

    /// Await the preview for a key, sharing any in-flight computation.
    pub async fn get<F, Fut>(&self, key: &PreviewKey, version: i64, compute: F) -> Option<Arc<Preview>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Preview, String>> + Send + 'static,
    {
        self.shared(key, version, compute).await
    }

    fn shared<F, Fut>(&self, key: &PreviewKey, version: i64, compute: F) -> SharedPreview
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Preview, String>> + Send + 'static,
    {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().version >= version => {
                entry.get().preview.clone()
            }
            Entry::Occupied(mut entry) => {
                let preview = start(key, compute);
                entry.insert(CacheEntry {
                    version,
                    preview: preview.clone(),
                });
                preview
            }
            Entry::Vacant(entry) => {
                let preview = start(key, compute);
                entry.insert(CacheEntry {
                    version,
                    preview: preview.clone(),
                });
                preview
            }
        }
    }

    /// Drop the entry for a key.
    pub fn remove(&self, key: &PreviewKey) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn start<F, Fut>(key: &PreviewKey, compute: F) -> SharedPreview
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Preview, String>> + Send + 'static,
{
    let key = key.clone();
    let shared = compute()
        .map(move |result| match result {
            Ok(preview) => Some(Arc::new(preview)),
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Preview computation failed");
                None
            }
        })
        .boxed()
        .shared();

    // Drive the computation even if every caller walks away
    tokio::spawn(shared.clone());
    shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn key() -> PreviewKey {
        PreviewKey::new(MediaItemId::new(), "abc")
    }

    fn preview(tag: &str) -> Preview {
        Preview {
            content_type: "image/webp".to_string(),
            bytes: Bytes::from(tag.to_string()),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_compute_once() {
        let cache = Arc::new(ThumbnailCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let key = key();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let gate = gate.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(&key, 0, move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move {
                            gate.notified().await;
                            Ok(preview("p"))
                        }
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.bytes, Bytes::from("p"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_does_not_block() {
        let cache = ThumbnailCache::new();
        let gate = Arc::new(Notify::new());
        let waiter = gate.clone();
        let key = key();

        let lookup = cache.get_or_compute(&key, 0, move || async move {
            waiter.notified().await;
            Ok(preview("p"))
        });
        assert!(matches!(lookup, Lookup::Loading));
        let (preview_data, is_loading) = lookup.into_parts();
        assert!(preview_data.is_none());
        assert!(is_loading);

        gate.notify_one();
        let ready = cache
            .get(&key, 0, || async { Err("should not run".to_string()) })
            .await;
        assert!(ready.is_some());

        let lookup = cache.get_or_compute(&key, 0, || async { Err("unused".to_string()) });
        assert!(matches!(lookup, Lookup::Ready(_)));
    }

    #[tokio::test]
    async fn test_failure_is_cached_until_version_changes() {
        let cache = ThumbnailCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key();

        for _ in 0..3 {
            let calls = calls.clone();
            let result = cache
                .get(&key, 1, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("decode failed".to_string()) }
                })
                .await;
            assert!(result.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (preview_data, is_loading) = cache
            .get_or_compute(&key, 1, || async { Ok(preview("x")) })
            .into_parts();
        assert!(preview_data.is_none());
        assert!(!is_loading);

        // A newer version clears the negative entry
        let result = cache.get(&key, 2, || async { Ok(preview("v2")) }).await;
        assert_eq!(result.unwrap().bytes, Bytes::from("v2"));
        let result = cache.get(&key, 1, || async { Ok(preview("v1")) }).await;
        assert_eq!(result.unwrap().bytes, Bytes::from("v2"));
    }

    #[tokio::test]
    async fn test_older_version_reuses_current_entry() {
        let cache = ThumbnailCache::new();
        let key = key();
        cache.get(&key, 5, || async { Ok(preview("v5")) }).await;

        let result = cache.get(&key, 3, || async { Ok(preview("v3")) }).await;
        assert_eq!(result.unwrap().bytes, Bytes::from("v5"));
    }

    #[tokio::test]
    async fn test_items_with_identical_content_keep_their_own_entries() {
        let cache = ThumbnailCache::new();
        let first = PreviewKey::new(MediaItemId::new(), "abc");
        let second = PreviewKey::new(MediaItemId::new(), "abc");

        cache.get(&first, 1, || async { Ok(preview("first")) }).await;
        // A later revision of the second item must not displace the first
        cache.get(&second, 7, || async { Ok(preview("second")) }).await;

        let result = cache.get(&first, 1, || async { Ok(preview("recomputed")) }).await;
        assert_eq!(result.unwrap().bytes, Bytes::from("first"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_evicts_entry() {
        let cache = ThumbnailCache::new();
        let key = key();
        cache.get(&key, 0, || async { Ok(preview("p")) }).await;
        assert_eq!(cache.len(), 1);

        cache.remove(&key);
        assert!(cache.is_empty());
    }
}
