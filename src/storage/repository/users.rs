// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User accounts.
//!
//! A user is created the first time a phone number passes OTP verification;
//! the phone index guarantees one account per number. Accounts are never
//! removed: deletion sets [`UserStatus::Deleted`].

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, ReadableTableMetadata};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::Role;
use crate::otp::phone::Msisdn;
use crate::storage::db::{read_json, scan_json, write_json, Store, USERS, USER_PHONES, WALLETS};
use crate::storage::{StoreError, StoreResult};

use super::wallets::StoredWallet;

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    /// Blocked by an admin; cannot sign in or use existing sessions.
    Suspended,
    /// Soft-deleted by the user.
    Deleted,
}

impl UserStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: String,
    pub phone: Msisdn,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub phone_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
}

impl StoredUser {
    pub fn new(phone: Msisdn, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phone,
            name: None,
            role,
            status: UserStatus::Active,
            phone_verified: false,
            created_at: now,
            updated_at: now,
            last_active_at: None,
        }
    }
}

/// Admin list filter. All fields are optional and combine with AND.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub status: Option<UserStatus>,
    pub role: Option<Role>,
    /// Substring of phone or name (case-insensitive).
    pub search: Option<String>,
}

impl UserFilter {
    fn matches(&self, user: &StoredUser) -> bool {
        if self.status.is_some_and(|s| s != user.status) {
            return false;
        }
        if self.role.is_some_and(|r| r != user.role) {
            return false;
        }
        match self.search.as_deref().map(str::to_lowercase) {
            Some(needle) if !needle.is_empty() => {
                user.phone.as_str().contains(&needle)
                    || user
                        .name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

/// Repository for user accounts.
pub struct UserRepository<'a> {
    store: &'a Store,
}

impl<'a> UserRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get(&self, user_id: &str) -> StoreResult<StoredUser> {
        self.find(user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("User {user_id}")))
    }

    pub fn find(&self, user_id: &str) -> StoreResult<Option<StoredUser>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(USERS)?;
        read_json(&table, user_id)
    }

    pub fn find_by_phone(&self, phone: &Msisdn) -> StoreResult<Option<StoredUser>> {
        let read_txn = self.store.db().begin_read()?;
        let phones = read_txn.open_table(USER_PHONES)?;
        let Some(user_id) = phones.get(phone.as_str())?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS)?;
        read_json(&users, &user_id)
    }

    /// Mark the phone as verified for its existing user, or create the user
    /// (and an empty wallet) if the phone is new.
    ///
    /// Returns the user and whether it was created by this call.
    pub fn upsert_verified(
        &self,
        phone: &Msisdn,
        role_for_new: Role,
        now: DateTime<Utc>,
    ) -> StoreResult<(StoredUser, bool)> {
        let write_txn = self.store.db().begin_write()?;
        let result = {
            let mut phones = write_txn.open_table(USER_PHONES)?;
            let mut users = write_txn.open_table(USERS)?;
            let existing_id = phones.get(phone.as_str())?.map(|v| v.value().to_string());

            match existing_id {
                Some(user_id) => {
                    let mut user: StoredUser = read_json(&users, &user_id)?
                        .ok_or_else(|| StoreError::NotFound(format!("User {user_id}")))?;
                    user.phone_verified = true;
                    user.last_active_at = Some(now);
                    user.updated_at = now;
                    write_json(&mut users, &user.id, &user)?;
                    (user, false)
                }
                None => {
                    let mut user = StoredUser::new(phone.clone(), role_for_new, now);
                    user.phone_verified = true;
                    user.last_active_at = Some(now);
                    write_json(&mut users, &user.id, &user)?;
                    phones.insert(phone.as_str(), user.id.as_str())?;

                    let mut wallets = write_txn.open_table(WALLETS)?;
                    write_json(&mut wallets, &user.id, &StoredWallet::new(&user.id, now))?;
                    (user, true)
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Apply `change` to a user inside one write transaction.
    pub fn update<F>(&self, user_id: &str, change: F) -> StoreResult<StoredUser>
    where
        F: FnOnce(&mut StoredUser),
    {
        let write_txn = self.store.db().begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let mut user: StoredUser = read_json(&users, user_id)?
                .ok_or_else(|| StoreError::NotFound(format!("User {user_id}")))?;
            change(&mut user);
            user.updated_at = Utc::now();
            write_json(&mut users, user_id, &user)?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }

    pub fn set_status(&self, user_id: &str, status: UserStatus) -> StoreResult<StoredUser> {
        self.update(user_id, |user| user.status = status)
    }

    pub fn set_role(&self, user_id: &str, role: Role) -> StoreResult<StoredUser> {
        self.update(user_id, |user| user.role = role)
    }

    /// All users, newest first.
    pub fn list_all(&self) -> StoreResult<Vec<StoredUser>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(USERS)?;
        let mut users: Vec<StoredUser> = scan_json(&table)?;
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    /// Filtered page of users plus the total number of matches.
    pub fn list(
        &self,
        filter: &UserFilter,
        limit: usize,
        offset: usize,
    ) -> StoreResult<(Vec<StoredUser>, usize)> {
        let matching: Vec<StoredUser> = self
            .list_all()?
            .into_iter()
            .filter(|user| filter.matches(user))
            .collect();
        let total = matching.len();
        Ok((matching.into_iter().skip(offset).take(limit).collect(), total))
    }

    pub fn count(&self) -> StoreResult<u64> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(USERS)?;
        Ok(table.len()?)
    }
}
