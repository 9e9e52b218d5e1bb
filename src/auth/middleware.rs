// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Router-level admin guard.
//!
//! Layered over the whole `/admin` subtree so no admin route can be added
//! without the check. The resolved user is stored in request extensions,
//! where the `Auth`/`AdminOnly` extractors pick it up without verifying the
//! token twice.
//!
//! ```rust,ignore
//! let admin = Router::new()
//!     .route("/stats", get(admin::get_stats))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), require_admin));
//! ```

use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::guard::{GuardDecision, RouteAccess};
use super::Auth;
use crate::audit_log;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType};

pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let user = match Auth::from_request_parts(&mut parts, &state).await {
        Ok(Auth(user)) => user,
        Err(err) => {
            tracing::debug!(path = %path, error = %err, "admin route without valid session");
            return err.into_response();
        }
    };

    let decision = GuardDecision::evaluate(RouteAccess::Admin, Some(user.role));
    if let Err(err) = decision.into_result() {
        tracing::warn!(user_id = %user.user_id, path = %path, "non-admin on admin route");
        audit_log!(
            &state.store,
            AuditEvent::new(AuditEventType::PermissionDenied)
                .with_user(user.user_id.as_str())
                .with_resource("route", path.as_str())
                .failed("admin role required")
        );
        return err.into_response();
    }

    next.run(Request::from_parts(parts, body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::start_session;
    use crate::auth::Role;
    use crate::otp::Msisdn;
    use crate::state::testing::TestApp;
    use crate::storage::{AuditQuery, AuditRepository, DeviceInfo, UserRepository};
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use chrono::Utc;
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/admin/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(state.clone(), require_admin))
            .with_state(state)
    }

    fn token_for(test: &TestApp, role: Role) -> String {
        let (user, _) = UserRepository::new(&test.state.store)
            .upsert_verified(&Msisdn::parse("+254798765432").unwrap(), role, Utc::now())
            .unwrap();
        start_session(&test.state, &user, DeviceInfo::default())
            .unwrap()
            .access
            .token
    }

    async fn call(router: Router, token: Option<&str>) -> StatusCode {
        let mut request = axum::http::Request::builder().uri("/admin/ping");
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let test = TestApp::new();
        assert_eq!(call(app(test.state.clone()), None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_admin_is_403_and_audited() {
        let test = TestApp::new();
        let token = token_for(&test, Role::User);
        assert_eq!(
            call(app(test.state.clone()), Some(&token)).await,
            StatusCode::FORBIDDEN
        );

        let query = AuditQuery {
            event_type: Some(AuditEventType::PermissionDenied),
            ..Default::default()
        };
        let (_, total) = AuditRepository::new(&test.state.store).query(&query, 10, 0).unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn admin_passes() {
        let test = TestApp::new();
        let token = token_for(&test, Role::Admin);
        assert_eq!(call(app(test.state.clone()), Some(&token)).await, StatusCode::OK);
    }
}
