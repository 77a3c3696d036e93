//! Time-bounded memoization of async lookups.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Result of a cache worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<V> {
    pub success: bool,
    pub value: V,
}

impl<V> Fetched<V> {
    pub fn ok(value: V) -> Self {
        Self { success: true, value }
    }

    pub fn failed(value: V) -> Self {
        Self {
            success: false,
            value,
        }
    }
}

/// Options for [`TtlCache::get_with_cache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Must be unique per call site and parameters.
    pub key: String,
    pub success_duration: Duration,
    /// Failed results are cached only when this is non-zero.
    pub failed_duration: Duration,
    pub force_refresh: bool,
}

impl CacheOptions {
    pub fn new(key: impl Into<String>, success_duration: Duration) -> Self {
        Self {
            key: key.into(),
            success_duration,
            failed_duration: Duration::ZERO,
            force_refresh: false,
        }
    }

    pub fn failed_for(mut self, duration: Duration) -> Self {
        self.failed_duration = duration;
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// Keyed cache whose entries expire after a per-entry duration.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Return the cached value for `options.key`, or run `worker` and cache
    /// its result. Expired entries are purged on every call.
    ///
    /// The worker runs without the cache lock held, so concurrent misses for
    /// the same key may both run it.
    pub async fn get_with_cache<F, Fut>(&self, options: &CacheOptions, worker: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Fetched<V>>,
    {
        {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            entries.retain(|_, (expires, _)| *expires >= now);
            if !options.force_refresh {
                if let Some((_, value)) = entries.get(&options.key) {
                    return value.clone();
                }
            }
        }

        debug!("cache miss: {}", options.key);
        let fetched = worker().await;
        let ttl = if fetched.success {
            Some(options.success_duration)
        } else if !options.failed_duration.is_zero() {
            Some(options.failed_duration)
        } else {
            None
        };
        if let Some(ttl) = ttl {
            self.entries
                .lock()
                .await
                .insert(options.key.clone(), (Instant::now() + ttl, fetched.value.clone()));
        }
        fetched.value
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn lookup(cache: &TtlCache<u32>, options: &CacheOptions, calls: &AtomicUsize, success: bool) -> u32 {
        cache
            .get_with_cache(options, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) as u32 + 1;
                Fetched { success, value: n }
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn caches_success_until_expiry() {
        let cache = TtlCache::new();
        let calls = AtomicUsize::new(0);
        let opts = CacheOptions::new("k", Duration::from_secs(10));

        assert_eq!(lookup(&cache, &opts, &calls, true).await, 1);
        assert_eq!(lookup(&cache, &opts, &calls, true).await, 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(lookup(&cache, &opts, &calls, true).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_not_cached_by_default() {
        let cache = TtlCache::new();
        let calls = AtomicUsize::new(0);
        let opts = CacheOptions::new("k", Duration::from_secs(10));

        assert_eq!(lookup(&cache, &opts, &calls, false).await, 1);
        assert_eq!(lookup(&cache, &opts, &calls, false).await, 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_cached_when_requested() {
        let cache = TtlCache::new();
        let calls = AtomicUsize::new(0);
        let opts = CacheOptions::new("k", Duration::from_secs(10)).failed_for(Duration::from_secs(2));

        assert_eq!(lookup(&cache, &opts, &calls, false).await, 1);
        assert_eq!(lookup(&cache, &opts, &calls, false).await, 1);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(lookup(&cache, &opts, &calls, false).await, 2);
    }

    #[tokio::test]
    async fn force_refresh_replaces_entry() {
        let cache = TtlCache::new();
        let calls = AtomicUsize::new(0);
        let opts = CacheOptions::new("k", Duration::from_secs(60));

        assert_eq!(lookup(&cache, &opts, &calls, true).await, 1);
        let forced = opts.clone().force_refresh(true);
        assert_eq!(lookup(&cache, &forced, &calls, true).await, 2);
        assert_eq!(lookup(&cache, &opts, &calls, true).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_purged() {
        let cache = TtlCache::new();
        let calls = AtomicUsize::new(0);
        lookup(&cache, &CacheOptions::new("a", Duration::from_secs(1)), &calls, true).await;
        lookup(&cache, &CacheOptions::new("b", Duration::from_secs(100)), &calls, true).await;
        assert_eq!(cache.len().await, 2);
        tokio::time::advance(Duration::from_secs(5)).await;
        lookup(&cache, &CacheOptions::new("b", Duration::from_secs(100)), &calls, true).await;
        assert_eq!(cache.len().await, 1);
    }
}
