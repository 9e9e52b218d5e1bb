// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Phone sign-in tokens and the session guard for the CityPulse API.
//!
//! ## Auth Flow
//!
//! 1. Client verifies an OTP (`POST /auth/otp/verify`)
//! 2. Server creates a session and signs an access/refresh token pair (HS256)
//! 3. Client sends `Authorization: Bearer <access token>`
//! 4. Server:
//!    - Verifies signature, expiry, issuer, audience and token type
//!    - Checks the session named by `sid` is neither revoked nor expired
//!    - Loads the user; suspended or deleted accounts are refused
//!    - Takes the role from the store, not from the token
//!
//! ## Security
//!
//! - Everything outside the public route table requires authentication
//! - `/admin/**` additionally requires the `admin` role
//! - Refresh tokens rotate on every use; replaying an old one revokes the
//!   session
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod extractor;
pub mod guard;
pub mod middleware;
pub mod roles;
pub mod session;
pub mod tokens;

pub use claims::AuthenticatedUser;
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, OptionalAuth};
pub use guard::{GuardDecision, RouteAccess};
pub use roles::Role;
pub use session::{refresh_session, start_session, TokenPair};
pub use tokens::TokenIssuer;
