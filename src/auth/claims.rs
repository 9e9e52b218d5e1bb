// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::Role;
use crate::otp::Msisdn;

/// Which half of a token pair a JWT is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by every token this service signs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Session ID
    pub sid: String,
    /// Role at issue time. Informational; the store is authoritative.
    pub role: Role,
    /// Token type
    pub typ: TokenKind,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token ID
    pub jti: String,
}

/// Authenticated user information resolved from a verified access token
/// and the current store state.
///
/// This is the primary type used throughout the application to represent
/// the authenticated user making a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// User ID
    pub user_id: String,

    /// User's current role
    pub role: Role,

    /// Session the access token belongs to
    pub session_id: String,

    /// Verified phone number
    pub phone: Msisdn,
}

impl AuthenticatedUser {
    /// Check if the user has the required role.
    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    /// Check if this user is an admin.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: "user_123".to_string(),
            role,
            session_id: "sess_abc".to_string(),
            phone: Msisdn::parse("+254712345678").unwrap(),
        }
    }

    #[test]
    fn has_role_checks_privilege() {
        let admin = sample(Role::Admin);
        assert!(admin.is_admin());
        assert!(admin.has_role(Role::User));

        let user = sample(Role::User);
        assert!(!user.is_admin());
        assert!(!user.has_role(Role::Admin));
    }

    #[test]
    fn token_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TokenKind::Refresh).unwrap(), "\"refresh\"");
    }
}
