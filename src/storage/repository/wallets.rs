// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cash wallets (one per user, integer cents).
//!
//! `pending_cash` is the part of `cash_balance` held by pending withdrawals;
//! `pending_cash <= cash_balance` always holds.

use chrono::{DateTime, Utc};
use redb::ReadableDatabase;
use serde::{Deserialize, Serialize};

use crate::storage::db::{read_json, write_json, Store, WALLETS};
use crate::storage::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredWallet {
    pub user_id: String,
    pub cash_balance: i64,
    pub pending_cash: i64,
    pub total_cash_earned: i64,
    pub total_cash_withdrawn: i64,
    pub updated_at: DateTime<Utc>,
}

impl StoredWallet {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            cash_balance: 0,
            pending_cash: 0,
            total_cash_earned: 0,
            total_cash_withdrawn: 0,
            updated_at: now,
        }
    }

    /// Balance not held by pending withdrawals.
    pub fn available(&self) -> i64 {
        self.cash_balance - self.pending_cash
    }
}

/// Repository for user wallets.
pub struct WalletRepository<'a> {
    store: &'a Store,
}

impl<'a> WalletRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get(&self, user_id: &str) -> StoreResult<StoredWallet> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        read_json(&table, user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("Wallet for user {user_id}")))
    }

    /// Add earnings to a wallet.
    pub fn credit(&self, user_id: &str, amount: i64, now: DateTime<Utc>) -> StoreResult<StoredWallet> {
        if amount <= 0 {
            return Err(StoreError::Rejected("Credit amount must be positive".to_string()));
        }
        let write_txn = self.store.db().begin_write()?;
        let wallet = {
            let mut table = write_txn.open_table(WALLETS)?;
            let mut wallet: StoredWallet = read_json(&table, user_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Wallet for user {user_id}")))?;
            wallet.cash_balance = wallet
                .cash_balance
                .checked_add(amount)
                .ok_or_else(|| StoreError::Rejected("Balance overflow".to_string()))?;
            wallet.total_cash_earned = wallet
                .total_cash_earned
                .checked_add(amount)
                .ok_or_else(|| StoreError::Rejected("Balance overflow".to_string()))?;
            wallet.updated_at = now;
            write_json(&mut table, user_id, &wallet)?;
            wallet
        };
        write_txn.commit()?;
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::otp::phone::Msisdn;
    use crate::storage::db::testing::temp_store;
    use crate::storage::UserRepository;

    #[test]
    fn credit_increases_balance_and_earnings() {
        let (store, _dir) = temp_store();
        let (user, _) = UserRepository::new(&store)
            .upsert_verified(&Msisdn::parse("0712345678").unwrap(), Role::User, Utc::now())
            .unwrap();
        let repo = WalletRepository::new(&store);

        repo.credit(&user.id, 12_500, Utc::now()).unwrap();
        let wallet = repo.credit(&user.id, 2_500, Utc::now()).unwrap();
        assert_eq!(wallet.cash_balance, 15_000);
        assert_eq!(wallet.total_cash_earned, 15_000);
        assert_eq!(wallet.available(), 15_000);
    }

    #[test]
    fn credit_rejects_non_positive_and_unknown() {
        let (store, _dir) = temp_store();
        let repo = WalletRepository::new(&store);
        assert!(matches!(repo.credit("u1", 0, Utc::now()), Err(StoreError::Rejected(_))));
        assert!(matches!(repo.credit("u1", 100, Utc::now()), Err(StoreError::NotFound(_))));
    }
}
