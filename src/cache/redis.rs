// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redis cache backend.
//!
//! Uses a multiplexed [`ConnectionManager`] that reconnects on failure; it is
//! cheap to clone, so every call clones it instead of holding a lock.
//!
//! Atomicity:
//! - `take` is a single `GETDEL` (Redis 6.2+).
//! - `incr_window` runs `INCR` + `PEXPIRE` + `PTTL` in one Lua script so a
//!   crash between the increment and the expiry can never leave a counter
//!   without a TTL.

use std::time::Duration;

use ::redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    cmd, Client, Script,
};
use async_trait::async_trait;

use super::{CacheResult, CacheStore, WindowCount};

const INCR_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
"#;

pub struct RedisCache {
    connection: ConnectionManager,
    incr_window: Script,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let config = ConnectionManagerConfig::new().set_number_of_retries(1);
        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager_with_config(config).await?;
        tracing::info!("Connected to Redis");
        Ok(Self {
            connection,
            incr_window: Script::new(INCR_WINDOW_SCRIPT),
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> CacheResult<WindowCount> {
        let mut conn = self.connection.clone();
        let (count, ttl_ms): (u64, i64) = self
            .incr_window
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;
        let resets_in = if ttl_ms > 0 {
            Duration::from_millis(ttl_ms as u64)
        } else {
            window
        };
        Ok(WindowCount { count, resets_in })
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(60)), 60_000);
    }

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        assert!(RedisCache::connect("not a url").await.is_err());
    }
}
