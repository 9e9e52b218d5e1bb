// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process cache backend.
//!
//! An LRU map with a per-entry deadline. A single mutex guards the map, which
//! makes `take` and `incr_window` atomic within the process. State is lost on
//! restart and is not shared between instances, so this backend is only
//! suitable for development and tests.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::{CacheError, CacheResult, CacheStore, WindowCount};

const DEFAULT_CAPACITY: usize = 10_000;

struct Entry {
    value: String,
    expires_at: Instant,
}

pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, LruCache<String, Entry>>> {
        self.entries.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Live value for `key`, dropping it if its deadline has passed.
    fn live<'a>(
        entries: &'a mut LruCache<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a Entry> {
        let expired = entries.peek(key).is_some_and(|e| e.expires_at <= now);
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.lock()?;
        entries.put(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn take(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.lock()?;
        Ok(entries
            .pop(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value))
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.lock()?.pop(key);
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> CacheResult<WindowCount> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let (count, expires_at) = match Self::live(&mut entries, key, now) {
            Some(entry) => (entry.value.parse::<u64>().unwrap_or(0) + 1, entry.expires_at),
            None => (1, now + window),
        };
        entries.put(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );
        Ok(WindowCount {
            count,
            resets_in: expires_at.saturating_duration_since(now),
        })
    }

    async fn ping(&self) -> CacheResult<()> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new(8);
        assert!(cache.get("k").await.unwrap().is_none());

        cache.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new(8);
        cache.set_ex("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.take("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let cache = MemoryCache::new(8);
        cache.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.take("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.take("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_take_has_one_winner() {
        let cache = std::sync::Arc::new(MemoryCache::new(8));
        cache.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.take("k").await.unwrap() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn incr_window_counts_and_resets() {
        let cache = MemoryCache::new(8);
        let window = Duration::from_millis(40);

        let first = cache.incr_window("c", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert!(first.resets_in <= window);

        let second = cache.incr_window("c", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert!(second.resets_in <= first.resets_in);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.incr_window("c", window).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recent() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set_ex("a", "1", ttl).await.unwrap();
        cache.set_ex("b", "2", ttl).await.unwrap();
        cache.set_ex("c", "3", ttl).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("c").await.unwrap().is_some());
    }
}
