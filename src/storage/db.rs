// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! redb database handle, table definitions and JSON helpers.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};

use super::StoreResult;

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Unique index: canonical phone → user id.
pub(crate) const USER_PHONES: TableDefinition<&str, &str> = TableDefinition::new("user_phones");

pub(crate) const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Index: `user_id|session_id` → session id.
pub(crate) const USER_SESSIONS: TableDefinition<&str, &str> =
    TableDefinition::new("user_sessions");

pub(crate) const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");

pub(crate) const WITHDRAWALS: TableDefinition<&str, &[u8]> = TableDefinition::new("withdrawals");

/// Index: `user_id|requested_at|withdrawal_id` → withdrawal id.
pub(crate) const USER_WITHDRAWALS: TableDefinition<&str, &str> =
    TableDefinition::new("user_withdrawals");

/// Audit log: `rfc3339_timestamp|event_id` → event. Lexicographic order is
/// chronological order.
pub(crate) const AUDIT_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_events");

// =============================================================================
// Key Helpers
// =============================================================================

pub(crate) fn index_key(parts: &[&str]) -> String {
    parts.join("|")
}

/// Fixed-width UTC timestamp whose lexicographic order is chronological.
pub(crate) fn sortable_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Half-open range covering every `owner|...` key.
///
/// `}` sorts immediately after `|`, so `owner}` is the first key past the
/// prefix.
pub(crate) fn prefix_range(owner: &str) -> (String, String) {
    (format!("{owner}|"), format!("{owner}}}"))
}

// =============================================================================
// JSON Helpers
// =============================================================================

pub(crate) fn read_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StoreResult<Option<T>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn write_json<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

pub(crate) fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StoreResult<Vec<T>> {
    let mut out = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        out.push(serde_json::from_slice(value.value())?);
    }
    Ok(out)
}

/// Values of an index table for every key under `owner|`.
pub(crate) fn index_values(
    table: &impl ReadableTable<&'static str, &'static str>,
    owner: &str,
) -> StoreResult<Vec<String>> {
    let (start, end) = prefix_range(owner);
    let mut out = Vec::new();
    for entry in table.range(start.as_str()..end.as_str())? {
        let (_, value) = entry?;
        out.push(value.value().to_string());
    }
    Ok(out)
}

// =============================================================================
// Store
// =============================================================================

/// Embedded ACID database shared by every repository.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (or create) the database at `path`, creating parent directories
    /// and every table.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_PHONES)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(USER_SESSIONS)?;
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(WITHDRAWALS)?;
            let _ = write_txn.open_table(USER_WITHDRAWALS)?;
            let _ = write_txn.open_table(AUDIT_EVENTS)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Opened database");
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Cheap read used by readiness probes.
    pub fn check(&self) -> StoreResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Store;

    /// Store in a temp dir; keep the guard alive for the test's duration.
    pub fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("citypulse.redb")).unwrap();
        (store, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::temp_store;
    use super::*;

    #[test]
    fn open_creates_tables_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.redb");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        store.check().unwrap();
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.redb");
        {
            let store = Store::open(&path).unwrap();
            let txn = store.db().begin_write().unwrap();
            {
                let mut table = txn.open_table(USERS).unwrap();
                write_json(&mut table, "u1", &serde_json::json!({"id": "u1"})).unwrap();
            }
            txn.commit().unwrap();
        }
        let store = Store::open(&path).unwrap();
        let txn = store.db().begin_read().unwrap();
        let table = txn.open_table(USERS).unwrap();
        let value: Option<serde_json::Value> = read_json(&table, "u1").unwrap();
        assert_eq!(value.unwrap()["id"], "u1");
    }

    #[test]
    fn prefix_range_isolates_owners() {
        let (store, _dir) = temp_store();
        let txn = store.db().begin_write().unwrap();
        {
            let mut table = txn.open_table(USER_SESSIONS).unwrap();
            table.insert(index_key(&["alice", "s1"]).as_str(), "s1").unwrap();
            table.insert(index_key(&["alice", "s2"]).as_str(), "s2").unwrap();
            table.insert(index_key(&["alice2", "s3"]).as_str(), "s3").unwrap();
            table.insert(index_key(&["bob", "s4"]).as_str(), "s4").unwrap();
        }
        txn.commit().unwrap();

        let txn = store.db().begin_read().unwrap();
        let table = txn.open_table(USER_SESSIONS).unwrap();
        assert_eq!(index_values(&table, "alice").unwrap(), vec!["s1", "s2"]);
        assert_eq!(index_values(&table, "bob").unwrap(), vec!["s4"]);
        assert!(index_values(&table, "carol").unwrap().is_empty());
    }
}
