// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Sweeper
//!
//! Background task that deletes sessions which expired, or were revoked,
//! more than a day ago. Live and recently ended sessions are kept so the
//! session list and refresh-reuse detection keep working.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::storage::{SessionRepository, Store};

/// How long ended sessions are retained.
fn retention() -> TimeDelta {
    TimeDelta::days(1)
}

pub struct SessionSweeper {
    store: Arc<Store>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(store: Arc<Store>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run the sweeper loop until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Session sweeper starting");

        loop {
            if shutdown.is_cancelled() {
                info!("Session sweeper shutting down");
                return;
            }

            self.sweep();

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Session sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One pass. Returns how many sessions were deleted.
    pub fn sweep(&self) -> usize {
        match SessionRepository::new(&self.store).purge_stale(Utc::now(), retention()) {
            Ok(0) => 0,
            Ok(purged) => {
                info!(purged, "Session sweeper: purged stale sessions");
                purged
            }
            Err(e) => {
                warn!(error = %e, "Session sweeper: purge failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::testing::temp_store;
    use crate::storage::{DeviceInfo, StoredSession};

    fn session(id: &str, expires_at: chrono::DateTime<Utc>) -> StoredSession {
        StoredSession {
            session_id: id.to_string(),
            user_id: "user_1".to_string(),
            refresh_token_digest: "d".to_string(),
            device: DeviceInfo::default(),
            created_at: expires_at - TimeDelta::days(30),
            last_used_at: expires_at - TimeDelta::days(30),
            expires_at,
            revoked_at: None,
        }
    }

    #[test]
    fn sweep_removes_only_long_dead_sessions() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();
        repo.create(&session("old", now - TimeDelta::days(3))).unwrap();
        repo.create(&session("recent", now - TimeDelta::hours(2))).unwrap();
        repo.create(&session("live", now + TimeDelta::days(10))).unwrap();

        let sweeper = SessionSweeper::new(Arc::new(store), Duration::from_secs(60));
        assert_eq!(sweeper.sweep(), 1);

        let repo = SessionRepository::new(&sweeper.store);
        assert!(repo.find("old").unwrap().is_none());
        assert!(repo.find("recent").unwrap().is_some());
        assert!(repo.find("live").unwrap().is_some());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (store, _dir) = temp_store();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            SessionSweeper::new(Arc::new(store), Duration::from_secs(3600)).run(shutdown.clone()),
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
