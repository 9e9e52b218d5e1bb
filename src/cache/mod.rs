// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cache & Rate-Limit Store
//!
//! Short-lived state lives here rather than in redb: OTP challenges, failure
//! counters, rate-limit windows and cached read models.
//!
//! | Backend | Used when |
//! |---------|-----------|
//! | [`RedisCache`] | `REDIS_URL` is set (required in production) |
//! | [`MemoryCache`] | development and tests |
//!
//! Both backends provide the two atomic primitives the OTP flow depends on:
//! [`CacheStore::take`] (read-and-delete) and [`CacheStore::incr_window`]
//! (increment with expiry set on the first hit).

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache lock poisoned")]
    LockPoisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Result of a fixed-window counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub resets_in: Duration,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Atomically read and delete a key.
    async fn take(&self, key: &str) -> CacheResult<Option<String>>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomically increment a counter, starting a `window`-long expiry on the
    /// first increment.
    async fn incr_window(&self, key: &str, window: Duration) -> CacheResult<WindowCount>;

    async fn ping(&self) -> CacheResult<()>;
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> CacheResult<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> CacheResult<()> {
    let raw = serde_json::to_string(value)?;
    cache.set_ex(key, &raw, ttl).await
}

/// Key layout. Every key the service writes is built here.
pub mod keys {
    use crate::otp::phone::Msisdn;

    pub fn otp_challenge(phone: &Msisdn) -> String {
        format!("otp:challenge:{phone}")
    }

    pub fn otp_cooldown(phone: &Msisdn) -> String {
        format!("otp:cooldown:{phone}")
    }

    pub fn otp_hourly(phone: &Msisdn) -> String {
        format!("otp:hourly:{phone}")
    }

    pub fn otp_failures(phone: &Msisdn) -> String {
        format!("otp:failures:{phone}")
    }

    pub fn user_profile(user_id: &str) -> String {
        format!("user:{user_id}:profile")
    }

    pub fn admin_stats() -> String {
        "admin:stats".to_string()
    }

    pub fn rate_limit(scope: &str, client: &str) -> String {
        format!("ratelimit:{scope}:{client}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
    }

    #[tokio::test]
    async fn json_helpers_round_trip_through_store() {
        let cache = MemoryCache::new(16);
        let profile = Profile {
            name: "Wanjiku".to_string(),
        };
        set_json(&cache, "user:1:profile", &profile, Duration::from_secs(60))
            .await
            .unwrap();

        let cached: Option<Profile> = get_json(&cache, "user:1:profile").await.unwrap();
        assert_eq!(cached, Some(profile));

        let missing: Option<Profile> = get_json(&cache, "user:2:profile").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn corrupt_json_is_an_error() {
        let cache = MemoryCache::new(16);
        cache
            .set_ex("user:1:profile", "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let result: CacheResult<Option<Profile>> = get_json(&cache, "user:1:profile").await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn keys_embed_canonical_phone() {
        let phone = crate::otp::phone::Msisdn::parse("0712345678").unwrap();
        assert_eq!(keys::otp_challenge(&phone), "otp:challenge:+254712345678");
        assert_eq!(keys::rate_limit("auth", "10.0.0.1"), "ratelimit:auth:10.0.0.1");
    }
}
