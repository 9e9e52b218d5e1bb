// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # One-Time Passwords
//!
//! Phone sign-in works in two steps:
//!
//! 1. `request`: validate the phone, apply the resend cooldown and hourly cap,
//!    store a challenge holding a keyed digest of a fresh 6-digit code, and
//!    text the code to the phone.
//! 2. `verify`: compare the submitted code against the digest and consume the
//!    challenge with an atomic take, so a code signs in at most once.
//!
//! Challenges live only in the cache store and disappear with their TTL.

pub mod challenge;
pub mod phone;
pub mod service;

use thiserror::Error;

use crate::cache::CacheError;
use crate::crypto::CryptoError;
use crate::sms::SmsError;

pub use challenge::{OtpChallenge, OtpState};
pub use phone::{Msisdn, PhoneError};
pub use service::{OtpDispatch, OtpService};

/// Number of digits in every code.
pub const CODE_LENGTH: usize = 6;

#[derive(Debug, Error)]
pub enum OtpError {
    #[error(transparent)]
    InvalidPhone(#[from] PhoneError),

    #[error("verification code must be {CODE_LENGTH} digits")]
    InvalidCode,

    #[error("{message}")]
    RateLimited {
        message: &'static str,
        retry_after_secs: u64,
    },

    #[error("verification code has expired or was never requested")]
    Expired,

    #[error("verification code is incorrect")]
    Mismatch { attempts_remaining: u64 },

    #[error("too many incorrect attempts, request a new code")]
    AttemptsExceeded,

    #[error("failed to deliver verification SMS: {0}")]
    Delivery(#[from] SmsError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
