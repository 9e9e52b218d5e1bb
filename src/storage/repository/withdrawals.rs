// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cash withdrawals to M-Pesa.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──approve──▶ approved   (balance debited, hold released)
//!    │────reject────▶ rejected   (hold released)
//!    └────cancel────▶ cancelled  (hold released, by the owner)
//! ```
//!
//! Creating a withdrawal places a hold on `pending_cash` in the same write
//! transaction, after checking the minimum amount, available balance and the
//! per-day limit.

use chrono::{DateTime, NaiveTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::db::{
    index_key, index_values, read_json, scan_json, sortable_timestamp, write_json, Store,
    USER_WITHDRAWALS, WALLETS, WITHDRAWALS,
};
use crate::storage::{StoreError, StoreResult};

use super::wallets::StoredWallet;

/// Smallest withdrawal (KES 50).
pub const MIN_WITHDRAWAL_CENTS: i64 = 5_000;
/// Largest single withdrawal and per-day total (KES 5,000).
pub const DAILY_WITHDRAWAL_LIMIT_CENTS: i64 = 500_000;
/// Fee charged on withdrawals, in percent.
pub const WITHDRAWAL_FEE_PERCENT: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Counts toward the daily limit.
    fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWithdrawal {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub fee: i64,
    pub net_amount: i64,
    /// AES-GCM sealed destination MSISDN.
    pub destination_sealed: String,
    /// Masked destination for display.
    pub destination_hint: String,
    pub status: WithdrawalStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_by: Option<String>,
}

impl StoredWithdrawal {
    pub fn fee_for(amount: i64) -> i64 {
        amount * WITHDRAWAL_FEE_PERCENT / 100
    }
}

/// Result of a decision: the updated withdrawal and wallet.
#[derive(Debug, Clone)]
pub struct Decided {
    pub withdrawal: StoredWithdrawal,
    pub wallet: StoredWallet,
}

/// Repository for withdrawals.
pub struct WithdrawalRepository<'a> {
    store: &'a Store,
}

impl<'a> WithdrawalRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Insert a pending withdrawal and hold its amount.
    pub fn create_with_hold(&self, withdrawal: &StoredWithdrawal) -> StoreResult<StoredWallet> {
        let amount = withdrawal.amount;
        if amount < MIN_WITHDRAWAL_CENTS {
            return Err(StoreError::Rejected(format!(
                "Minimum withdrawal is {MIN_WITHDRAWAL_CENTS} cents"
            )));
        }
        if amount > DAILY_WITHDRAWAL_LIMIT_CENTS {
            return Err(StoreError::Rejected(format!(
                "Maximum withdrawal is {DAILY_WITHDRAWAL_LIMIT_CENTS} cents"
            )));
        }

        let write_txn = self.store.db().begin_write()?;
        let wallet = {
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut wallet: StoredWallet = read_json(&wallets, &withdrawal.user_id)?
                .ok_or_else(|| {
                    StoreError::NotFound(format!("Wallet for user {}", withdrawal.user_id))
                })?;

            let available = wallet.available();
            if amount > available {
                return Err(StoreError::Rejected(format!(
                    "Available balance is {available} cents"
                )));
            }

            let day_start = withdrawal
                .requested_at
                .date_naive()
                .and_time(NaiveTime::MIN)
                .and_utc();
            let today_total: i64 = {
                let index = write_txn.open_table(USER_WITHDRAWALS)?;
                let table = write_txn.open_table(WITHDRAWALS)?;
                let mut total = 0;
                for id in index_values(&index, &withdrawal.user_id)? {
                    if let Some(w) = read_json::<StoredWithdrawal>(&table, &id)? {
                        if w.requested_at >= day_start && w.status.is_live() {
                            total += w.amount;
                        }
                    }
                }
                total
            };
            if today_total + amount > DAILY_WITHDRAWAL_LIMIT_CENTS {
                return Err(StoreError::Rejected(format!(
                    "Daily withdrawal limit is {DAILY_WITHDRAWAL_LIMIT_CENTS} cents"
                )));
            }

            let mut table = write_txn.open_table(WITHDRAWALS)?;
            if table.get(withdrawal.id.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "Withdrawal {} already exists",
                    withdrawal.id
                )));
            }
            write_json(&mut table, &withdrawal.id, withdrawal)?;

            let mut index = write_txn.open_table(USER_WITHDRAWALS)?;
            index.insert(
                index_key(&[
                    &withdrawal.user_id,
                    &sortable_timestamp(withdrawal.requested_at),
                    &withdrawal.id,
                ])
                .as_str(),
                withdrawal.id.as_str(),
            )?;

            wallet.pending_cash += amount;
            wallet.updated_at = withdrawal.requested_at;
            write_json(&mut wallets, &wallet.user_id, &wallet)?;
            wallet
        };
        write_txn.commit()?;
        Ok(wallet)
    }

    pub fn get(&self, id: &str) -> StoreResult<StoredWithdrawal> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(WITHDRAWALS)?;
        read_json(&table, id)?.ok_or_else(|| StoreError::NotFound(format!("Withdrawal {id}")))
    }

    /// Withdrawal owned by `user_id`; someone else's is reported as missing.
    pub fn get_owned(&self, id: &str, user_id: &str) -> StoreResult<StoredWithdrawal> {
        let withdrawal = self.get(id)?;
        if withdrawal.user_id != user_id {
            return Err(StoreError::NotFound(format!("Withdrawal {id}")));
        }
        Ok(withdrawal)
    }

    /// A user's withdrawals, newest first.
    pub fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<StoredWithdrawal>> {
        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(USER_WITHDRAWALS)?;
        let table = read_txn.open_table(WITHDRAWALS)?;
        let mut out = Vec::new();
        for id in index_values(&index, user_id)?.into_iter().rev() {
            if let Some(w) = read_json(&table, &id)? {
                out.push(w);
            }
        }
        Ok(out)
    }

    /// Filtered page (newest first) plus the total number of matches.
    pub fn list(
        &self,
        status: Option<WithdrawalStatus>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<(Vec<StoredWithdrawal>, usize)> {
        let mut all = self.list_all()?;
        all.retain(|w| status.is_none_or(|s| s == w.status));
        let total = all.len();
        Ok((all.into_iter().skip(offset).take(limit).collect(), total))
    }

    /// Every withdrawal, newest first.
    pub fn list_all(&self) -> StoreResult<Vec<StoredWithdrawal>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(WITHDRAWALS)?;
        let mut all: Vec<StoredWithdrawal> = scan_json(&table)?;
        all.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(all)
    }

    pub fn approve(&self, id: &str, admin_id: &str, now: DateTime<Utc>) -> StoreResult<Decided> {
        self.decide(id, None, now, |withdrawal, wallet| {
            withdrawal.status = WithdrawalStatus::Approved;
            withdrawal.decided_by = Some(admin_id.to_string());
            wallet.cash_balance -= withdrawal.amount;
            wallet.total_cash_withdrawn += withdrawal.amount;
        })
    }

    pub fn reject(
        &self,
        id: &str,
        admin_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Decided> {
        self.decide(id, None, now, |withdrawal, _| {
            withdrawal.status = WithdrawalStatus::Rejected;
            withdrawal.decided_by = Some(admin_id.to_string());
            withdrawal.failure_reason = Some(reason.to_string());
        })
    }

    /// Owner cancels a pending withdrawal.
    pub fn cancel(&self, id: &str, user_id: &str, now: DateTime<Utc>) -> StoreResult<Decided> {
        self.decide(id, Some(user_id), now, |withdrawal, _| {
            withdrawal.status = WithdrawalStatus::Cancelled;
            withdrawal.decided_by = Some(withdrawal.user_id.clone());
        })
    }

    /// Move a pending withdrawal to a final state and release its hold.
    fn decide<F>(
        &self,
        id: &str,
        owner: Option<&str>,
        now: DateTime<Utc>,
        apply: F,
    ) -> StoreResult<Decided>
    where
        F: FnOnce(&mut StoredWithdrawal, &mut StoredWallet),
    {
        let write_txn = self.store.db().begin_write()?;
        let decided = {
            let mut table = write_txn.open_table(WITHDRAWALS)?;
            let mut withdrawal: StoredWithdrawal = read_json(&table, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Withdrawal {id}")))?;
            if owner.is_some_and(|owner| owner != withdrawal.user_id) {
                return Err(StoreError::NotFound(format!("Withdrawal {id}")));
            }
            if withdrawal.status != WithdrawalStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "Withdrawal {id} is already {:?}",
                    withdrawal.status
                )));
            }

            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut wallet: StoredWallet = read_json(&wallets, &withdrawal.user_id)?
                .ok_or_else(|| {
                    StoreError::NotFound(format!("Wallet for user {}", withdrawal.user_id))
                })?;

            wallet.pending_cash = (wallet.pending_cash - withdrawal.amount).max(0);
            apply(&mut withdrawal, &mut wallet);
            withdrawal.decided_at = Some(now);
            wallet.updated_at = now;

            write_json(&mut table, id, &withdrawal)?;
            write_json(&mut wallets, &wallet.user_id, &wallet)?;
            Decided { withdrawal, wallet }
        };
        write_txn.commit()?;
        Ok(decided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::otp::phone::Msisdn;
    use crate::storage::db::testing::temp_store;
    use crate::storage::{UserRepository, WalletRepository};
    use chrono::Duration;
    use uuid::Uuid;

    fn funded_user(store: &Store, balance: i64) -> String {
        let (user, _) = UserRepository::new(store)
            .upsert_verified(&Msisdn::parse("0712345678").unwrap(), Role::User, Utc::now())
            .unwrap();
        if balance > 0 {
            WalletRepository::new(store)
                .credit(&user.id, balance, Utc::now())
                .unwrap();
        }
        user.id
    }

    fn pending(user_id: &str, amount: i64, at: DateTime<Utc>) -> StoredWithdrawal {
        StoredWithdrawal {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            fee: StoredWithdrawal::fee_for(amount),
            net_amount: amount - StoredWithdrawal::fee_for(amount),
            destination_sealed: "sealed".to_string(),
            destination_hint: "+254*****5678".to_string(),
            status: WithdrawalStatus::Pending,
            failure_reason: None,
            requested_at: at,
            decided_at: None,
            decided_by: None,
        }
    }

    #[test]
    fn create_places_hold() {
        let (store, _dir) = temp_store();
        let user_id = funded_user(&store, 20_000);
        let repo = WithdrawalRepository::new(&store);

        let wallet = repo.create_with_hold(&pending(&user_id, 8_000, Utc::now())).unwrap();
        assert_eq!(wallet.pending_cash, 8_000);
        assert_eq!(wallet.available(), 12_000);
        assert_eq!(repo.list_for_user(&user_id).unwrap().len(), 1);
    }

    #[test]
    fn create_enforces_minimum_and_balance() {
        let (store, _dir) = temp_store();
        let user_id = funded_user(&store, 10_000);
        let repo = WithdrawalRepository::new(&store);

        assert!(matches!(
            repo.create_with_hold(&pending(&user_id, 4_999, Utc::now())),
            Err(StoreError::Rejected(_))
        ));
        repo.create_with_hold(&pending(&user_id, 6_000, Utc::now())).unwrap();
        // Only 4,000 left available.
        assert!(matches!(
            repo.create_with_hold(&pending(&user_id, 5_000, Utc::now())),
            Err(StoreError::Rejected(_))
        ));
    }

    #[test]
    fn create_enforces_daily_limit() {
        let (store, _dir) = temp_store();
        let user_id = funded_user(&store, 2_000_000);
        let repo = WithdrawalRepository::new(&store);
        let now = Utc::now();

        // Yesterday's withdrawals don't count toward today.
        repo.create_with_hold(&pending(&user_id, 400_000, now - Duration::days(1)))
            .unwrap();
        repo.create_with_hold(&pending(&user_id, 300_000, now)).unwrap();
        assert!(matches!(
            repo.create_with_hold(&pending(&user_id, 250_000, now)),
            Err(StoreError::Rejected(_))
        ));
        repo.create_with_hold(&pending(&user_id, 200_000, now)).unwrap();
    }

    #[test]
    fn credit_refuses_to_overflow_lifetime_earnings() {
        let (store, _dir) = temp_store();
        let user_id = funded_user(&store, i64::MAX - 1_000);
        let repo = WithdrawalRepository::new(&store);
        let w = pending(&user_id, 5_000, Utc::now());
        repo.create_with_hold(&w).unwrap();
        repo.approve(&w.id, "admin-1", Utc::now()).unwrap();

        // The balance has room, lifetime earnings do not.
        let wallets = WalletRepository::new(&store);
        assert!(matches!(
            wallets.credit(&user_id, 3_000, Utc::now()),
            Err(StoreError::Rejected(_))
        ));
        let wallet = wallets.get(&user_id).unwrap();
        assert_eq!(wallet.cash_balance, i64::MAX - 6_000);
        assert_eq!(wallet.total_cash_earned, i64::MAX - 1_000);
    }

    #[test]
    fn approve_debits_and_releases_hold() {
        let (store, _dir) = temp_store();
        let user_id = funded_user(&store, 20_000);
        let repo = WithdrawalRepository::new(&store);
        let w = pending(&user_id, 8_000, Utc::now());
        repo.create_with_hold(&w).unwrap();

        let decided = repo.approve(&w.id, "admin-1", Utc::now()).unwrap();
        assert_eq!(decided.withdrawal.status, WithdrawalStatus::Approved);
        assert_eq!(decided.withdrawal.decided_by.as_deref(), Some("admin-1"));
        assert_eq!(decided.wallet.cash_balance, 12_000);
        assert_eq!(decided.wallet.pending_cash, 0);
        assert_eq!(decided.wallet.total_cash_withdrawn, 8_000);

        assert!(matches!(
            repo.approve(&w.id, "admin-1", Utc::now()),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn reject_and_cancel_release_hold_only() {
        let (store, _dir) = temp_store();
        let user_id = funded_user(&store, 20_000);
        let repo = WithdrawalRepository::new(&store);
        let a = pending(&user_id, 6_000, Utc::now());
        let b = pending(&user_id, 7_000, Utc::now());
        repo.create_with_hold(&a).unwrap();
        repo.create_with_hold(&b).unwrap();

        let rejected = repo.reject(&a.id, "admin-1", "Invalid M-Pesa number", Utc::now()).unwrap();
        assert_eq!(rejected.withdrawal.failure_reason.as_deref(), Some("Invalid M-Pesa number"));
        assert_eq!(rejected.wallet.cash_balance, 20_000);
        assert_eq!(rejected.wallet.pending_cash, 7_000);

        assert!(matches!(
            repo.cancel(&b.id, "someone-else", Utc::now()),
            Err(StoreError::NotFound(_))
        ));
        let cancelled = repo.cancel(&b.id, &user_id, Utc::now()).unwrap();
        assert_eq!(cancelled.withdrawal.status, WithdrawalStatus::Cancelled);
        assert_eq!(cancelled.wallet.pending_cash, 0);
        assert_eq!(cancelled.wallet.available(), 20_000);
    }

    #[test]
    fn list_filters_by_status() {
        let (store, _dir) = temp_store();
        let user_id = funded_user(&store, 100_000);
        let repo = WithdrawalRepository::new(&store);
        let a = pending(&user_id, 6_000, Utc::now());
        repo.create_with_hold(&a).unwrap();
        repo.create_with_hold(&pending(&user_id, 6_000, Utc::now())).unwrap();
        repo.approve(&a.id, "admin", Utc::now()).unwrap();

        assert_eq!(repo.list(None, 10, 0).unwrap().1, 2);
        assert_eq!(repo.list(Some(WithdrawalStatus::Pending), 10, 0).unwrap().1, 1);
        assert_eq!(repo.list(Some(WithdrawalStatus::Approved), 10, 0).unwrap().0[0].id, a.id);
        assert!(matches!(repo.get_owned(&a.id, "other"), Err(StoreError::NotFound(_))));
    }
}
