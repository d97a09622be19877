//! Directory-existence cache.
//!
//! Remembers, per normalized prefix, whether at least one object lives
//! beneath it, so that a prefix listing is not issued on every request.
//! Entries expire after a fixed time-to-live; an optional janitor task
//! purges expired entries to bound memory.
//!
//! Time is measured with `tokio::time::Instant` so expiry can be driven by
//! a paused test clock.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    has_contents: bool,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Concurrent prefix -> "has contents" map with per-entry expiry.
#[derive(Debug)]
pub struct DirCache {
    entries: DashMap<String, CacheEntry>,
    /// Default time-to-live; zero keeps entries forever.
    ttl: Duration,
}

impl DirCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached answer for `key`, or `None` when absent or expired.
    pub fn get(&self, key: &str) -> Option<bool> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.has_contents);
            }
        }
        // Expired: drop it unless another task refreshed it meanwhile.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Store `has_contents` for `key` with the default time-to-live.
    pub fn set(&self, key: &str, has_contents: bool) {
        self.set_with_ttl(key, has_contents, self.ttl);
    }

    /// Store `has_contents` for `key`, expiring after `ttl` (zero: never).
    pub fn set_with_ttl(&self, key: &str, has_contents: bool, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                has_contents,
                expires_at,
            },
        );
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a task purging expired entries every `interval`.
    ///
    /// The task only holds a weak reference and exits once the cache is
    /// dropped.  A zero interval disables purging and returns `None`.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        let cache: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Directory cache janitor purged {} expired entries", purged);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_value_within_ttl() {
        let cache = DirCache::new(Duration::from_secs(60));
        cache.set("blog/", true);
        cache.set("empty/", false);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("blog/"), Some(true));
        assert_eq!(cache.get("empty/"), Some(false));
        assert_eq!(cache.get("unknown/"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = DirCache::new(Duration::from_secs(60));
        cache.set("blog/", true);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get("blog/"), None);
        // The expired entry was dropped on read.
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let cache = DirCache::new(Duration::ZERO);
        cache.set("blog/", true);

        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(cache.get("blog/"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_overrides_default() {
        let cache = DirCache::new(Duration::from_secs(600));
        cache.set_with_ttl("short/", true, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("short/"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_expiry() {
        let cache = DirCache::new(Duration::from_secs(10));
        cache.set("blog/", false);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("blog/", true);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("blog/"), Some(true));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = DirCache::new(Duration::from_secs(10));
        cache.set("a/", true);
        cache.set("b/", false);
        cache.set_with_ttl("c/", true, Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("c/"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_purges_in_background() {
        let cache = Arc::new(DirCache::new(Duration::from_secs(5)));
        let janitor = cache.spawn_janitor(Duration::from_secs(10)).unwrap();
        cache.set("a/", true);
        cache.set("b/", true);

        // Let the janitor fire once after both entries expired.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 0);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(janitor.is_finished());
    }

    #[tokio::test]
    async fn test_zero_interval_disables_janitor() {
        let cache = Arc::new(DirCache::new(Duration::from_secs(5)));
        assert!(cache.spawn_janitor(Duration::ZERO).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_and_get() {
        let cache = Arc::new(DirCache::new(Duration::from_secs(60)));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("dir-{}/", i % 8);
                cache.set(&key, i % 2 == 0);
                cache.get(&key)
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(cache.len(), 8);
    }
}
