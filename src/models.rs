// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Response views shared by several route groups. Each view is built from a
//! stored record and decides what the client is allowed to see: phone
//! numbers and payout destinations are masked unless an admin is asking.
//!
//! Request bodies and endpoint-specific responses live next to their
//! handlers in `api::*`.
//!
//! ## Money
//!
//! Amounts are integer cents (KES). `150_00` is KES 150.00.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;
use crate::storage::{
    StoredUser, StoredWallet, StoredWithdrawal, UserStatus, WithdrawalStatus,
    repository::{DAILY_WITHDRAWAL_LIMIT_CENTS, MIN_WITHDRAWAL_CENTS},
};

// =============================================================================
// Users
// =============================================================================

/// A user as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    /// User ID (UUID).
    pub id: String,
    /// Phone number; masked (`+254*****5678`) outside admin views.
    #[schema(example = "+254*****5678")]
    pub phone: String,
    /// Display name, if set.
    pub name: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub phone_verified: bool,
    pub created_at: DateTime<Utc>,
    /// Last successful sign-in.
    pub last_active_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// View for the user themself: phone masked.
    pub fn masked(user: &StoredUser) -> Self {
        Self::with_phone(user, user.phone.masked())
    }

    /// View for admins: full phone number.
    pub fn unmasked(user: &StoredUser) -> Self {
        Self::with_phone(user, user.phone.to_string())
    }

    fn with_phone(user: &StoredUser, phone: String) -> Self {
        Self {
            id: user.id.clone(),
            phone,
            name: user.name.clone(),
            role: user.role,
            status: user.status,
            phone_verified: user.phone_verified,
            created_at: user.created_at,
            last_active_at: user.last_active_at,
        }
    }
}

// =============================================================================
// Wallets
// =============================================================================

/// Wallet balances and withdrawal eligibility.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WalletSummary {
    /// Total cash balance in cents.
    pub cash_balance: i64,
    /// Cents held by pending withdrawals.
    pub pending_cash: i64,
    /// `cash_balance - pending_cash`.
    pub withdrawable: i64,
    /// Lifetime credits in cents.
    pub total_cash_earned: i64,
    /// Lifetime approved withdrawals in cents.
    pub total_cash_withdrawn: i64,
    /// Whether `withdrawable` reaches the minimum withdrawal.
    pub can_withdraw: bool,
    /// Smallest withdrawal in cents.
    pub min_withdrawal: i64,
    /// Largest total of withdrawals per day in cents.
    pub daily_limit: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoredWallet> for WalletSummary {
    fn from(wallet: &StoredWallet) -> Self {
        let withdrawable = wallet.available();
        Self {
            cash_balance: wallet.cash_balance,
            pending_cash: wallet.pending_cash,
            withdrawable,
            total_cash_earned: wallet.total_cash_earned,
            total_cash_withdrawn: wallet.total_cash_withdrawn,
            can_withdraw: withdrawable >= MIN_WITHDRAWAL_CENTS,
            min_withdrawal: MIN_WITHDRAWAL_CENTS,
            daily_limit: DAILY_WITHDRAWAL_LIMIT_CENTS,
            updated_at: wallet.updated_at,
        }
    }
}

// =============================================================================
// Withdrawals
// =============================================================================

/// A withdrawal request. The destination is always the masked hint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WithdrawalView {
    pub id: String,
    pub user_id: String,
    /// Requested amount in cents.
    pub amount: i64,
    pub fee: i64,
    /// Amount paid out after fees.
    pub net_amount: i64,
    /// Masked M-Pesa number.
    #[schema(example = "+254*****5678")]
    pub destination: String,
    pub status: WithdrawalStatus,
    /// Rejection reason, if rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl From<&StoredWithdrawal> for WithdrawalView {
    fn from(w: &StoredWithdrawal) -> Self {
        Self {
            id: w.id.clone(),
            user_id: w.user_id.clone(),
            amount: w.amount,
            fee: w.fee,
            net_amount: w.net_amount,
            destination: w.destination_hint.clone(),
            status: w.status,
            failure_reason: w.failure_reason.clone(),
            requested_at: w.requested_at,
            decided_at: w.decided_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::Msisdn;
    use chrono::Utc;

    #[test]
    fn profile_masks_phone_for_owner_only() {
        let user = StoredUser::new(Msisdn::parse("0712345678").unwrap(), Role::User, Utc::now());
        assert_eq!(UserProfile::masked(&user).phone, "+254*****5678");
        assert_eq!(UserProfile::unmasked(&user).phone, "+254712345678");
    }

    #[test]
    fn wallet_summary_eligibility() {
        let mut wallet = StoredWallet::new("u1", Utc::now());
        wallet.cash_balance = 6_000;
        wallet.pending_cash = 2_000;
        let summary = WalletSummary::from(&wallet);
        assert_eq!(summary.withdrawable, 4_000);
        assert!(!summary.can_withdraw);

        wallet.pending_cash = 0;
        assert!(WalletSummary::from(&wallet).can_withdraw);
    }
}
