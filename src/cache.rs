use async_trait::async_trait;
use futures::future::BoxFuture;
use moka::{future::Cache as MokaCache, Expiry};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::error::{GateError, Result};

/// Produces a value on a cache miss.
pub type Loader = BoxFuture<'static, anyhow::Result<Vec<u8>>>;

/// Byte-value cache exposed to business logic. The request pipeline never
/// consults it.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up `key`. `None` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`. A zero `ttl` means the entry never
    /// expires on its own.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Return the cached value, or run `loader` once, store its output
    /// with `ttl` and return it. Concurrent misses for the same key share
    /// a single load. Loader errors are returned and nothing is cached.
    async fn get_or_load(&self, key: &str, ttl: Duration, loader: Loader) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug)]
struct Entry {
    value: Arc<[u8]>,
    ttl: Option<Duration>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }
}

/// Reads each entry's own time-to-live.
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _current_time: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _current_time: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process cache on top of moka with per-entry TTL.
#[derive(Clone)]
pub struct LocalCache {
    inner: MokaCache<String, Entry>,
}

impl LocalCache {
    /// `max_capacity` is the number of entries kept before eviction.
    pub fn new(max_capacity: u64) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { inner }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get(key).await.map(|entry| entry.value.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.inner.insert(key.to_string(), Entry::new(value, ttl)).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn get_or_load(&self, key: &str, ttl: Duration, loader: Loader) -> Result<Vec<u8>> {
        let entry = self
            .inner
            .try_get_with(key.to_string(), async move {
                loader.await.map(|value| Entry::new(value, ttl))
            })
            .await
            .map_err(|e: Arc<anyhow::Error>| GateError::Cache(format!("load failed for {key:?}: {e}")))?;
        Ok(entry.value.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = LocalCache::new(100);
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", b"v1".to_vec(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v1".to_vec()));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = LocalCache::new(100);
        cache.set("short", b"x".to_vec(), Duration::from_millis(50)).await.unwrap();
        cache.set("forever", b"y".to_vec(), Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("forever").await.unwrap(), Some(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_ttl() {
        let cache = LocalCache::new(100);
        cache.set("k", b"old".to_vec(), Duration::from_millis(50)).await.unwrap();
        cache.set("k", b"new".to_vec(), Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_load() {
        let cache = LocalCache::new(100);
        let loads = Arc::new(AtomicUsize::new(0));

        let calls = (0..8).map(|_| {
            let loads = loads.clone();
            let cache = cache.clone();
            async move {
                let loader = async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(b"loaded".to_vec())
                }
                .boxed();
                cache.get_or_load("shared", Duration::ZERO, loader).await
            }
        });

        for result in futures::future::join_all(calls).await {
            assert_eq!(result.unwrap(), b"loaded".to_vec());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let cache = LocalCache::new(100);

        let failing: Loader = async { Err(anyhow::anyhow!("backend down")) }.boxed();
        let err = cache.get_or_load("k", Duration::ZERO, failing).await.unwrap_err();
        assert!(err.to_string().contains("backend down"));
        assert_eq!(cache.get("k").await.unwrap(), None);

        let working: Loader = async { Ok(b"ok".to_vec()) }.boxed();
        assert_eq!(
            cache.get_or_load("k", Duration::ZERO, working).await.unwrap(),
            b"ok".to_vec()
        );
    }

    #[tokio::test]
    async fn test_hit_skips_loader() {
        let cache = LocalCache::new(100);
        cache.set("k", b"cached".to_vec(), Duration::ZERO).await.unwrap();

        let loader: Loader = async { panic!("loader must not run on a hit") }.boxed();
        assert_eq!(
            cache.get_or_load("k", Duration::ZERO, loader).await.unwrap(),
            b"cached".to_vec()
        );
    }
}
