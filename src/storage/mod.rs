// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Storage
//!
//! All durable state lives in a single embedded redb database (pure Rust,
//! ACID). Values are JSON documents; secondary indexes are separate tables
//! with composite string keys so per-user lookups are prefix range scans.
//!
//! ## Table Layout
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | `users` | user id | [`StoredUser`] |
//! | `user_phones` | canonical phone | user id |
//! | `sessions` | session id | [`StoredSession`] |
//! | `user_sessions` | `user_id\|session_id` | session id |
//! | `wallets` | user id | [`StoredWallet`] |
//! | `withdrawals` | withdrawal id | [`StoredWithdrawal`] |
//! | `user_withdrawals` | `user_id\|requested_at\|withdrawal_id` | withdrawal id |
//! | `audit_events` | `timestamp\|event_id` | [`AuditEvent`] |
//!
//! Multi-record changes (user + wallet creation, withdrawal + balance hold,
//! approval + debit) happen inside one write transaction.

pub mod audit;
pub mod db;
pub mod repository;

use thiserror::Error;

pub use audit::{AuditEvent, AuditEventType, AuditQuery, AuditRepository};
pub use db::Store;
pub use repository::{
    DeviceInfo, SessionRepository, StoredSession, StoredUser, StoredWallet, StoredWithdrawal,
    UserFilter, UserRepository, UserStatus, WalletRepository, WithdrawalRepository,
    WithdrawalStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The named record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The record exists but is not in a state that allows the change.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A business rule refused the change.
    #[error("rejected: {0}")]
    Rejected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
