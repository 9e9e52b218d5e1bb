// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! CityPulse API - phone sign-in, wallets and admin review
//!
//! Backend for the CityPulse mobile app and web admin dashboard. Users sign
//! in with a one-time code sent by SMS, earn cash into a wallet and cash out
//! to M-Pesa once an admin approves the withdrawal.
//!
//! ## Modules
//!
//! - `api` - HTTP handlers and router (Axum)
//! - `auth` - Access/refresh tokens, sessions and route guards
//! - `otp` - Phone normalization and one-time code issuance
//! - `cache` - Key/value cache (in-process LRU or Redis)
//! - `storage` - Embedded database (redb) and audit trail
//! - `sms` - SMS delivery (console or Twilio)

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod otp;
pub mod ratelimit;
pub mod sms;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod tls;
