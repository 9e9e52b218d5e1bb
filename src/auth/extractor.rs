// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```
//!
//! A token is accepted only if its signature, issuer, audience, expiry and
//! type check out, its session is still live, and its user exists and is
//! active. The role comes from the store, so a demotion takes effect on the
//! next request.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::Utc;

use super::{AuthError, AuthenticatedUser};
use crate::state::AppState;
use crate::storage::{SessionRepository, UserRepository, UserStatus};

/// Pull the bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Verify an access token against the token issuer and the store.
pub fn authenticate(state: &AppState, token: &str) -> Result<AuthenticatedUser, AuthError> {
    let claims = state.tokens.verify_access(token)?;
    let now = Utc::now();

    let session = SessionRepository::new(&state.store)
        .find(&claims.sid)?
        .filter(|s| s.user_id == claims.sub && s.is_active(now))
        .ok_or(AuthError::SessionRevoked)?;

    let user = UserRepository::new(&state.store)
        .find(&claims.sub)?
        .ok_or(AuthError::UnknownUser)?;
    match user.status {
        UserStatus::Active => {}
        UserStatus::Suspended => return Err(AuthError::AccountSuspended),
        UserStatus::Deleted => return Err(AuthError::AccountDeleted),
    }

    Ok(AuthenticatedUser {
        user_id: user.id,
        role: user.role,
        session_id: session.session_id,
        phone: user.phone,
    })
}

/// Extractor for authenticated users.
///
/// # Example
///
/// ```rust,ignore
/// async fn get_wallet(
///     Auth(user): Auth,
///     State(state): State<AppState>,
/// ) -> Result<Json<WalletResponse>, ApiError> {
///     // user.user_id contains the authenticated user's ID
///     // user.role contains their role
/// }
/// ```
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // First check if middleware already set the user
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let user = authenticate(state, bearer_token(auth_header)?)?;
        parts.extensions.insert(user.clone());
        Ok(Auth(user))
    }
}

/// Extractor that requires admin role.
pub struct AdminOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(AdminOnly(user))
    }
}

/// Optional authentication extractor.
///
/// Returns `None` if no valid authentication is present, instead of rejecting.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(user)) => Ok(OptionalAuth(Some(user))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::start_session;
    use crate::auth::Role;
    use crate::otp::Msisdn;
    use crate::state::testing::TestApp;
    use crate::storage::DeviceInfo;
    use axum::http::Request;

    fn parts_with(token: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/test");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn signed_in(app: &TestApp, role: Role) -> (String, String) {
        let (user, _) = UserRepository::new(&app.state.store)
            .upsert_verified(&Msisdn::parse("+254712345678").unwrap(), role, Utc::now())
            .unwrap();
        let pair = start_session(&app.state, &user, DeviceInfo::default()).unwrap();
        (user.id, pair.access.token)
    }

    #[tokio::test]
    async fn auth_extractor_requires_auth_header() {
        let app = TestApp::new();
        let mut parts = parts_with(None);
        let result = Auth::from_request_parts(&mut parts, &app.state).await;
        assert!(matches!(result, Err(AuthError::MissingAuthHeader)));
    }

    #[tokio::test]
    async fn auth_extractor_rejects_non_bearer() {
        let app = TestApp::new();
        let mut parts = Request::builder()
            .header("Authorization", "Basic abc")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let result = Auth::from_request_parts(&mut parts, &app.state).await;
        assert!(matches!(result, Err(AuthError::InvalidAuthHeader)));
    }

    #[tokio::test]
    async fn auth_extractor_succeeds_with_live_session() {
        let app = TestApp::new();
        let (user_id, token) = signed_in(&app, Role::User);
        let mut parts = parts_with(Some(&token));

        let Auth(user) = Auth::from_request_parts(&mut parts, &app.state).await.unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, Role::User);
        assert!(parts.extensions.get::<AuthenticatedUser>().is_some());
    }

    #[tokio::test]
    async fn revoked_session_invalidates_access_token() {
        let app = TestApp::new();
        let (_, token) = signed_in(&app, Role::User);
        let claims = app.state.tokens.verify_access(&token).unwrap();
        SessionRepository::new(&app.state.store)
            .revoke(&claims.sid, Utc::now())
            .unwrap();

        let result = Auth::from_request_parts(&mut parts_with(Some(&token)), &app.state).await;
        assert!(matches!(result, Err(AuthError::SessionRevoked)));
    }

    #[tokio::test]
    async fn suspended_user_is_rejected() {
        let app = TestApp::new();
        let (user_id, token) = signed_in(&app, Role::User);
        UserRepository::new(&app.state.store)
            .set_status(&user_id, UserStatus::Suspended)
            .unwrap();

        let result = Auth::from_request_parts(&mut parts_with(Some(&token)), &app.state).await;
        assert!(matches!(result, Err(AuthError::AccountSuspended)));
    }

    #[tokio::test]
    async fn role_is_read_from_store() {
        let app = TestApp::new();
        let (user_id, token) = signed_in(&app, Role::Admin);
        UserRepository::new(&app.state.store)
            .set_role(&user_id, Role::User)
            .unwrap();

        let result = AdminOnly::from_request_parts(&mut parts_with(Some(&token)), &app.state).await;
        assert!(matches!(result, Err(AuthError::InsufficientPermissions)));
    }

    #[tokio::test]
    async fn auth_extractor_prefers_extensions() {
        let app = TestApp::new();
        let mut parts = parts_with(None);
        parts.extensions.insert(AuthenticatedUser {
            user_id: "user_from_middleware".to_string(),
            role: Role::Admin,
            session_id: "sess".to_string(),
            phone: Msisdn::parse("+254712345678").unwrap(),
        });

        let Auth(user) = Auth::from_request_parts(&mut parts, &app.state).await.unwrap();
        assert_eq!(user.user_id, "user_from_middleware");
    }

    #[tokio::test]
    async fn admin_only_rejects_non_admin() {
        let app = TestApp::new();
        let (_, token) = signed_in(&app, Role::User);
        let result = AdminOnly::from_request_parts(&mut parts_with(Some(&token)), &app.state).await;
        assert!(matches!(result, Err(AuthError::InsufficientPermissions)));
    }

    #[tokio::test]
    async fn optional_auth_returns_none_without_user() {
        let app = TestApp::new();
        let OptionalAuth(user) = OptionalAuth::from_request_parts(&mut parts_with(None), &app.state)
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc").unwrap(), "abc");
        assert!(bearer_token("Bearer ").is_err());
        assert!(bearer_token("bearer abc").is_err());
    }
}
