// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Route classification and access decisions.
//!
//! The same table backs the server-side extractors and `GET /auth/guard`,
//! which the web dashboard calls before rendering a page.

use axum::http::StatusCode;
use serde::Serialize;
use utoipa::ToSchema;

use super::{AuthError, Role};

/// Access class of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RouteAccess {
    Public,
    Authenticated,
    Admin,
}

/// Outcome of evaluating a session against a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GuardDecision {
    Allow,
    RedirectToLogin,
    RedirectAway,
}

const PUBLIC_PREFIXES: &[&str] = &["/health", "/docs", "/api-doc/", "/auth/otp/"];
const PUBLIC_EXACT: &[&str] = &["/auth/refresh", "/auth/guard"];

/// `true` if `path` is `prefix` or lies beneath it.
fn under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl RouteAccess {
    pub fn classify(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if under(path, "/admin") {
            return Self::Admin;
        }
        let public = PUBLIC_EXACT.contains(&path)
            || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix));
        if public {
            Self::Public
        } else {
            Self::Authenticated
        }
    }
}

impl GuardDecision {
    /// Decide for a caller with `role` (`None` = no valid session).
    pub fn evaluate(access: RouteAccess, role: Option<Role>) -> Self {
        match (access, role) {
            (RouteAccess::Public, _) => Self::Allow,
            (_, None) => Self::RedirectToLogin,
            (RouteAccess::Admin, Some(role)) if !role.has_privilege(Role::Admin) => {
                Self::RedirectAway
            }
            _ => Self::Allow,
        }
    }

    /// Server-side equivalent of a redirect.
    pub fn into_result(self) -> Result<(), AuthError> {
        match self {
            Self::Allow => Ok(()),
            Self::RedirectToLogin => Err(AuthError::MissingAuthHeader),
            Self::RedirectAway => Err(AuthError::InsufficientPermissions),
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::Allow => StatusCode::OK,
            Self::RedirectToLogin => StatusCode::UNAUTHORIZED,
            Self::RedirectAway => StatusCode::FORBIDDEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_routes() {
        assert_eq!(RouteAccess::classify("/admin"), RouteAccess::Admin);
        assert_eq!(RouteAccess::classify("/admin/users/42"), RouteAccess::Admin);
        assert_eq!(RouteAccess::classify("/administrator"), RouteAccess::Authenticated);
        assert_eq!(RouteAccess::classify("/health/ready"), RouteAccess::Public);
        assert_eq!(RouteAccess::classify("/docs/"), RouteAccess::Public);
        assert_eq!(RouteAccess::classify("/api-doc/openapi.json"), RouteAccess::Public);
        assert_eq!(RouteAccess::classify("/auth/otp/request"), RouteAccess::Public);
        assert_eq!(RouteAccess::classify("/auth/refresh"), RouteAccess::Public);
        assert_eq!(RouteAccess::classify("/auth/guard?path=/admin"), RouteAccess::Public);
        assert_eq!(RouteAccess::classify("/auth/logout"), RouteAccess::Authenticated);
        assert_eq!(RouteAccess::classify("/users/me"), RouteAccess::Authenticated);
        assert_eq!(RouteAccess::classify("/"), RouteAccess::Authenticated);
    }

    #[test]
    fn decisions() {
        use GuardDecision::*;
        assert_eq!(GuardDecision::evaluate(RouteAccess::Public, None), Allow);
        assert_eq!(GuardDecision::evaluate(RouteAccess::Authenticated, None), RedirectToLogin);
        assert_eq!(GuardDecision::evaluate(RouteAccess::Admin, None), RedirectToLogin);
        assert_eq!(GuardDecision::evaluate(RouteAccess::Admin, Some(Role::User)), RedirectAway);
        assert_eq!(GuardDecision::evaluate(RouteAccess::Admin, Some(Role::Admin)), Allow);
        assert_eq!(GuardDecision::evaluate(RouteAccess::Authenticated, Some(Role::User)), Allow);
    }

    #[test]
    fn decisions_map_to_http() {
        assert!(GuardDecision::Allow.into_result().is_ok());
        assert!(matches!(
            GuardDecision::RedirectAway.into_result(),
            Err(AuthError::InsufficientPermissions)
        ));
        assert_eq!(GuardDecision::RedirectToLogin.status(), StatusCode::UNAUTHORIZED);
    }
}
