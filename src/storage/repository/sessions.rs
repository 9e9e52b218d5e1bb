// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Login sessions.
//!
//! One session per successful OTP verification. Access tokens carry the
//! session id, so revoking a session invalidates every token issued for it.
//! The refresh token is stored only as a keyed digest and rotated on every
//! refresh.

use chrono::{DateTime, Duration, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::db::{
    index_key, index_values, read_json, scan_json, write_json, Store, SESSIONS, USER_SESSIONS,
};
use crate::storage::{StoreError, StoreResult};

/// Client details captured at sign-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub user_id: String,
    pub refresh_token_digest: String,
    #[serde(default)]
    pub device: DeviceInfo,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Repository for login sessions.
pub struct SessionRepository<'a> {
    store: &'a Store,
}

impl<'a> SessionRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn create(&self, session: &StoredSession) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            if sessions.get(session.session_id.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "Session {} already exists",
                    session.session_id
                )));
            }
            write_json(&mut sessions, &session.session_id, session)?;
            let mut index = write_txn.open_table(USER_SESSIONS)?;
            index.insert(
                index_key(&[&session.user_id, &session.session_id]).as_str(),
                session.session_id.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn find(&self, session_id: &str) -> StoreResult<Option<StoredSession>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        read_json(&table, session_id)
    }

    pub fn get(&self, session_id: &str) -> StoreResult<StoredSession> {
        self.find(session_id)?
            .ok_or_else(|| StoreError::NotFound(format!("Session {session_id}")))
    }

    /// Replace the refresh digest and extend the session.
    ///
    /// Fails with `Conflict` unless `expected_digest` matches the stored one,
    /// so two concurrent refreshes with the same token cannot both succeed.
    pub fn rotate(
        &self,
        session_id: &str,
        expected_digest: &str,
        new_digest: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredSession> {
        let write_txn = self.store.db().begin_write()?;
        let session = {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut session: StoredSession = read_json(&sessions, session_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Session {session_id}")))?;
            if !session.is_active(now) {
                return Err(StoreError::Conflict("Session is no longer active".to_string()));
            }
            if session.refresh_token_digest != expected_digest {
                return Err(StoreError::Conflict("Refresh token already used".to_string()));
            }
            session.refresh_token_digest = new_digest.to_string();
            session.last_used_at = now;
            session.expires_at = expires_at;
            write_json(&mut sessions, session_id, &session)?;
            session
        };
        write_txn.commit()?;
        Ok(session)
    }

    /// Revoke one session. Returns `false` if it was already revoked.
    pub fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let write_txn = self.store.db().begin_write()?;
        let changed = {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut session: StoredSession = read_json(&sessions, session_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Session {session_id}")))?;
            if session.revoked_at.is_some() {
                false
            } else {
                session.revoked_at = Some(now);
                write_json(&mut sessions, session_id, &session)?;
                true
            }
        };
        write_txn.commit()?;
        Ok(changed)
    }

    /// Revoke every live session of a user. Returns how many were revoked.
    pub fn revoke_all_for_user(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.store.db().begin_write()?;
        let mut revoked = 0;
        {
            let index = write_txn.open_table(USER_SESSIONS)?;
            let ids = index_values(&index, user_id)?;
            drop(index);

            let mut sessions = write_txn.open_table(SESSIONS)?;
            for id in ids {
                let Some(mut session) = read_json::<StoredSession>(&sessions, &id)? else {
                    continue;
                };
                if session.revoked_at.is_none() {
                    session.revoked_at = Some(now);
                    write_json(&mut sessions, &id, &session)?;
                    revoked += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(revoked)
    }

    /// Active sessions of a user, most recently used first.
    pub fn list_active_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredSession>> {
        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(USER_SESSIONS)?;
        let sessions = read_txn.open_table(SESSIONS)?;

        let mut out = Vec::new();
        for id in index_values(&index, user_id)? {
            if let Some(session) = read_json::<StoredSession>(&sessions, &id)? {
                if session.is_active(now) {
                    out.push(session);
                }
            }
        }
        out.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(out)
    }

    pub fn count_active(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        let sessions: Vec<StoredSession> = scan_json(&table)?;
        Ok(sessions.iter().filter(|s| s.is_active(now)).count())
    }

    /// Delete sessions that expired, or were revoked, more than `grace` ago.
    pub fn purge_stale(&self, now: DateTime<Utc>, grace: Duration) -> StoreResult<usize> {
        let cutoff = now - grace;
        let write_txn = self.store.db().begin_write()?;
        let stale: Vec<StoredSession> = {
            let sessions = write_txn.open_table(SESSIONS)?;
            scan_json::<StoredSession>(&sessions)?
                .into_iter()
                .filter(|s| s.expires_at < cutoff || s.revoked_at.is_some_and(|r| r < cutoff))
                .collect()
        };
        {
            let mut sessions = write_txn.open_table(SESSIONS)?;
            let mut index = write_txn.open_table(USER_SESSIONS)?;
            for session in &stale {
                sessions.remove(session.session_id.as_str())?;
                index.remove(index_key(&[&session.user_id, &session.session_id]).as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::testing::temp_store;

    fn session(id: &str, user_id: &str, now: DateTime<Utc>) -> StoredSession {
        StoredSession {
            session_id: id.to_string(),
            user_id: user_id.to_string(),
            refresh_token_digest: format!("digest-{id}"),
            device: DeviceInfo {
                device_type: Some("android".to_string()),
                ..Default::default()
            },
            created_at: now,
            last_used_at: now,
            expires_at: now + Duration::days(30),
            revoked_at: None,
        }
    }

    #[test]
    fn create_get_and_duplicate() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();
        repo.create(&session("s1", "u1", now)).unwrap();

        let loaded = repo.get("s1").unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert!(loaded.is_active(now));
        assert!(matches!(
            repo.create(&session("s1", "u1", now)),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(repo.get("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn rotate_requires_current_digest() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();
        repo.create(&session("s1", "u1", now)).unwrap();

        let later = now + Duration::minutes(5);
        let rotated = repo
            .rotate("s1", "digest-s1", "digest-2", later + Duration::days(30), later)
            .unwrap();
        assert_eq!(rotated.refresh_token_digest, "digest-2");
        assert_eq!(rotated.last_used_at, later);

        // Replaying the old digest fails.
        assert!(matches!(
            repo.rotate("s1", "digest-s1", "digest-3", later, later),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn revoke_is_idempotent_and_blocks_rotation() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();
        repo.create(&session("s1", "u1", now)).unwrap();

        assert!(repo.revoke("s1", now).unwrap());
        assert!(!repo.revoke("s1", now).unwrap());
        assert!(!repo.get("s1").unwrap().is_active(now));
        assert!(matches!(
            repo.rotate("s1", "digest-s1", "x", now + Duration::days(1), now),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn revoke_all_only_touches_one_user() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();
        repo.create(&session("s1", "u1", now)).unwrap();
        repo.create(&session("s2", "u1", now)).unwrap();
        repo.create(&session("s3", "u2", now)).unwrap();

        assert_eq!(repo.revoke_all_for_user("u1", now).unwrap(), 2);
        assert!(repo.list_active_for_user("u1", now).unwrap().is_empty());
        assert_eq!(repo.list_active_for_user("u2", now).unwrap().len(), 1);
        assert_eq!(repo.count_active(now).unwrap(), 1);
    }

    #[test]
    fn expired_sessions_are_inactive_and_purged() {
        let (store, _dir) = temp_store();
        let repo = SessionRepository::new(&store);
        let now = Utc::now();

        let mut old = session("old", "u1", now - Duration::days(40));
        old.expires_at = now - Duration::days(10);
        repo.create(&old).unwrap();
        repo.create(&session("fresh", "u1", now)).unwrap();

        let mut revoked_recently = session("revoked", "u1", now);
        revoked_recently.revoked_at = Some(now - Duration::hours(1));
        repo.create(&revoked_recently).unwrap();

        assert_eq!(repo.list_active_for_user("u1", now).unwrap().len(), 1);
        assert_eq!(repo.purge_stale(now, Duration::days(1)).unwrap(), 1);
        assert!(repo.find("old").unwrap().is_none());
        assert!(repo.find("revoked").unwrap().is_some());
        assert!(repo.find("fresh").unwrap().is_some());
    }
}
