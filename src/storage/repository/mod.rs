// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the redb store.
//!
//! Each repository borrows the shared [`Store`](super::Store) and owns the
//! transactions for one entity type.

pub mod sessions;
pub mod users;
pub mod wallets;
pub mod withdrawals;

pub use sessions::{DeviceInfo, SessionRepository, StoredSession};
pub use users::{StoredUser, UserFilter, UserRepository, UserStatus};
pub use wallets::{StoredWallet, WalletRepository};
pub use withdrawals::{
    Decided, StoredWithdrawal, WithdrawalRepository, WithdrawalStatus,
    DAILY_WITHDRAWAL_LIMIT_CENTS, MIN_WITHDRAWAL_CENTS,
};
