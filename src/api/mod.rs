// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP routes.
//!
//! Layers, outermost first: request id, tracing, request id propagation,
//! CORS, per-IP rate limit. The `/admin` subtree adds `require_admin`.

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{middleware::require_admin, GuardDecision, Role, RouteAccess},
    error::ErrorBody,
    models::{UserProfile, WalletSummary, WithdrawalView},
    ratelimit::limit_requests,
    state::AppState,
    storage::{AuditEvent, AuditEventType, DeviceInfo, UserStatus, WithdrawalStatus},
};

pub mod admin;
pub mod auth;
pub mod health;
pub mod users;
pub mod wallet;
pub mod withdrawals;

pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/stats", get(admin::get_system_stats))
        .route("/users", get(admin::list_users))
        .route("/users/{user_id}", get(admin::get_user))
        .route("/users/{user_id}/status", patch(admin::update_user_status))
        .route("/users/{user_id}/role", patch(admin::update_user_role))
        .route("/users/{user_id}/wallet/credit", post(admin::credit_wallet))
        .route("/withdrawals", get(admin::list_withdrawals))
        .route(
            "/withdrawals/{withdrawal_id}/approve",
            post(admin::approve_withdrawal),
        )
        .route(
            "/withdrawals/{withdrawal_id}/reject",
            post(admin::reject_withdrawal),
        )
        .route("/audit/events", get(admin::query_audit_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/auth/otp/request", post(auth::request_otp))
        .route("/auth/otp/verify", post(auth::verify_otp))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/guard", get(auth::guard))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout/all", post(auth::logout_all))
        .route("/auth/sessions", get(auth::list_sessions))
        .route(
            "/auth/sessions/{session_id}",
            delete(auth::revoke_session),
        )
        .route(
            "/users/me",
            get(users::get_me)
                .patch(users::update_me)
                .delete(users::delete_me),
        )
        .route("/wallet", get(wallet::get_wallet))
        .route(
            "/withdrawals",
            get(withdrawals::list_withdrawals).post(withdrawals::create_withdrawal),
        )
        .route(
            "/withdrawals/{withdrawal_id}",
            get(withdrawals::get_withdrawal),
        )
        .route(
            "/withdrawals/{withdrawal_id}/cancel",
            post(withdrawals::cancel_withdrawal),
        )
        .nest("/admin", admin_routes);

    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(state.clone(), limit_requests))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Permissive when no origins are configured.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ])
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "CityPulse API", description = "Phone sign-in, wallets and admin review"),
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::request_otp,
        auth::verify_otp,
        auth::refresh,
        auth::guard,
        auth::logout,
        auth::logout_all,
        auth::list_sessions,
        auth::revoke_session,
        users::get_me,
        users::update_me,
        users::delete_me,
        wallet::get_wallet,
        withdrawals::create_withdrawal,
        withdrawals::list_withdrawals,
        withdrawals::get_withdrawal,
        withdrawals::cancel_withdrawal,
        admin::get_system_stats,
        admin::list_users,
        admin::get_user,
        admin::update_user_status,
        admin::update_user_role,
        admin::credit_wallet,
        admin::list_withdrawals,
        admin::approve_withdrawal,
        admin::reject_withdrawal,
        admin::query_audit_logs
    ),
    components(
        schemas(
            ErrorBody,
            UserProfile,
            WalletSummary,
            WithdrawalView,
            Role,
            UserStatus,
            WithdrawalStatus,
            DeviceInfo,
            RouteAccess,
            GuardDecision,
            AuditEvent,
            AuditEventType
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Auth", description = "OTP sign-in and sessions"),
        (name = "Users", description = "The signed-in user's account"),
        (name = "Wallet", description = "Balances"),
        (name = "Withdrawals", description = "Cash-out requests"),
        (name = "Admin", description = "Dashboard operations (admin role)")
    )
)]
struct ApiDoc;
