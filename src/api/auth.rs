// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Phone sign-in and session management.
//!
//! | Route | Auth |
//! |-------|------|
//! | `POST /auth/otp/request` | public |
//! | `POST /auth/otp/verify` | public |
//! | `POST /auth/refresh` | refresh token in body |
//! | `GET /auth/guard` | optional |
//! | `POST /auth/logout`, `POST /auth/logout/all` | bearer |
//! | `GET /auth/sessions`, `DELETE /auth/sessions/{id}` | bearer |

use axum::{
    extract::{Path, Query, State},
    http::{header::USER_AGENT, HeaderMap},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit_log,
    auth::{
        refresh_session, start_session, Auth, GuardDecision, OptionalAuth, Role, RouteAccess,
        TokenPair,
    },
    error::ApiError,
    models::UserProfile,
    otp::OtpError,
    ratelimit::ClientIp,
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, DeviceInfo, SessionRepository, StoredUser, UserRepository,
        UserStatus,
    },
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpRequestBody {
    /// Kenyan mobile number in any common form (`0712345678`, `+254712345678`).
    #[schema(example = "+254712345678")]
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpRequestResponse {
    pub success: bool,
    pub message: String,
    /// Seconds until the code expires.
    pub expires_in: u64,
    /// The code itself, only in development.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_code: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpVerifyBody {
    #[schema(example = "+254712345678")]
    pub phone: String,
    /// The 6-digit code from the SMS.
    #[schema(example = "123456")]
    pub code: String,
    /// Optional client details recorded on the session.
    #[serde(default)]
    pub device: Option<DeviceInfo>,
}

/// Token pair plus the signed-in user.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    /// Access token (JWT).
    pub token: String,
    pub refresh_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserProfile,
    /// True when this sign-in created the account.
    pub is_new_user: bool,
}

impl AuthResponse {
    fn new(pair: TokenPair, user: &StoredUser, is_new_user: bool) -> Self {
        Self {
            token: pair.access.token,
            refresh_token: pair.refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: pair.access.expires_in,
            user: UserProfile::masked(user),
            is_new_user,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshBody {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub success: bool,
    /// Number of sessions ended by this call.
    pub revoked: usize,
}

/// One of the caller's live sessions.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: String,
    pub device: DeviceInfo,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Whether this is the session making the request.
    pub is_current: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
    pub total: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct GuardQuery {
    /// Path the client is about to open.
    pub path: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GuardResponse {
    pub path: String,
    pub access: RouteAccess,
    pub decision: GuardDecision,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Send a sign-in code by SMS.
#[utoipa::path(
    post,
    path = "/auth/otp/request",
    tag = "Auth",
    request_body = OtpRequestBody,
    responses(
        (status = 200, description = "Code sent", body = OtpRequestResponse),
        (status = 400, description = "Invalid phone number", body = crate::error::ErrorBody),
        (status = 429, description = "Cooldown or hourly cap reached", body = crate::error::ErrorBody),
        (status = 502, description = "SMS provider failed", body = crate::error::ErrorBody)
    )
)]
pub async fn request_otp(
    State(state): State<AppState>,
    client: ClientIp,
    Json(body): Json<OtpRequestBody>,
) -> Result<Json<OtpRequestResponse>, ApiError> {
    let dispatch = match state.otp.request(&body.phone).await {
        Ok(dispatch) => dispatch,
        Err(err) => {
            if let OtpError::Delivery(ref detail) = err {
                audit_log!(
                    &state.store,
                    AuditEvent::new(AuditEventType::OtpDeliveryFailed)
                        .with_ip(client.to_option_string())
                        .with_details(json!({ "provider": state.sms.provider() }))
                        .failed(detail.to_string())
                );
            }
            return Err(err.into());
        }
    };

    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::OtpRequested)
            .with_resource("otp_challenge", dispatch.challenge_id.as_str())
            .with_ip(client.to_option_string())
            .with_details(json!({ "phone": dispatch.phone.masked() }))
    );

    let debug_code = state
        .config
        .environment
        .is_development()
        .then(|| dispatch.code.clone());

    Ok(Json(OtpRequestResponse {
        success: true,
        message: "Verification code sent".to_string(),
        expires_in: dispatch.expires_in.as_secs(),
        debug_code,
    }))
}

/// Check a sign-in code and start a session.
///
/// Creates the account on first sign-in. Phones listed in `ADMIN_PHONES`
/// get the admin role.
#[utoipa::path(
    post,
    path = "/auth/otp/verify",
    tag = "Auth",
    request_body = OtpVerifyBody,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 400, description = "Malformed phone or code", body = crate::error::ErrorBody),
        (status = 401, description = "Code expired or incorrect", body = crate::error::ErrorBody),
        (status = 403, description = "Account suspended or deleted", body = crate::error::ErrorBody),
        (status = 429, description = "Too many incorrect attempts", body = crate::error::ErrorBody)
    )
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    client: ClientIp,
    headers: HeaderMap,
    Json(body): Json<OtpVerifyBody>,
) -> Result<Json<AuthResponse>, ApiError> {
    let phone = match state.otp.verify(&body.phone, &body.code).await {
        Ok(phone) => phone,
        Err(err) => {
            if matches!(
                err,
                OtpError::Expired | OtpError::Mismatch { .. } | OtpError::AttemptsExceeded
            ) {
                audit_log!(
                    &state.store,
                    AuditEvent::new(AuditEventType::OtpFailed)
                        .with_ip(client.to_option_string())
                        .failed(err.to_string())
                );
            }
            return Err(err.into());
        }
    };

    let users = UserRepository::new(&state.store);
    if let Some(existing) = users.find_by_phone(&phone)? {
        if existing.status != UserStatus::Active {
            tracing::warn!(
                user_id = %existing.id,
                status = ?existing.status,
                "sign-in refused for inactive account"
            );
            audit_log!(
                &state.store,
                AuditEvent::new(AuditEventType::OtpFailed)
                    .with_user(existing.id.as_str())
                    .with_ip(client.to_option_string())
                    .failed("account inactive")
            );
            return Err(ApiError::forbidden(
                "account_inactive",
                "This account is not active",
            ));
        }
    }

    let listed_admin = state.config.is_admin_phone(&phone);
    let role = if listed_admin { Role::Admin } else { Role::User };
    let (mut user, is_new_user) = users.upsert_verified(&phone, role, Utc::now())?;
    if listed_admin && user.role != Role::Admin {
        user = users.set_role(&user.id, Role::Admin)?;
        tracing::info!(user_id = %user.id, "promoted listed admin phone");
    }

    if is_new_user {
        tracing::info!(user_id = %user.id, phone = %state.log_phone(&phone), role = %user.role, "User created");
        audit_log!(
            &state.store,
            AuditEvent::new(AuditEventType::UserCreated)
                .with_user(user.id.as_str())
                .with_ip(client.to_option_string())
        );
    }

    let mut device = body.device.unwrap_or_default();
    device.user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    device.ip_address = client.to_option_string();

    let pair = start_session(&state, &user, device)?;
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::OtpVerified)
            .with_user(user.id.as_str())
            .with_resource("session", pair.session_id.as_str())
            .with_ip(client.to_option_string())
            .with_details(json!({ "is_new_user": is_new_user }))
    );
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::SessionCreated)
            .with_user(user.id.as_str())
            .with_resource("session", pair.session_id.as_str())
    );

    Ok(Json(AuthResponse::new(pair, &user, is_new_user)))
}

/// Exchange a refresh token for a new token pair.
///
/// Refresh tokens are single-use. Presenting one that was already exchanged
/// ends the session.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = RefreshBody,
    responses(
        (status = 200, description = "New token pair", body = AuthResponse),
        (status = 401, description = "Refresh token invalid, expired or reused", body = crate::error::ErrorBody),
        (status = 403, description = "Account suspended", body = crate::error::ErrorBody)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (pair, user) = refresh_session(&state, &body.refresh_token)?;
    Ok(Json(AuthResponse::new(pair, &user, false)))
}

/// End the current session.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session ended", body = LogoutResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let revoked = SessionRepository::new(&state.store).revoke(&user.session_id, Utc::now())?;
    audit_log!(
        &state.store,
        AuditEventType::SessionRevoked,
        &user,
        "session",
        user.session_id.as_str()
    );
    tracing::info!(user_id = %user.user_id, session_id = %user.session_id, "Logged out");
    Ok(Json(LogoutResponse {
        success: true,
        revoked: usize::from(revoked),
    }))
}

/// End every session of the caller, including this one.
#[utoipa::path(
    post,
    path = "/auth/logout/all",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All sessions ended", body = LogoutResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout_all(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let revoked =
        SessionRepository::new(&state.store).revoke_all_for_user(&user.user_id, Utc::now())?;
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::SessionRevoked)
            .with_user(user.user_id.as_str())
            .with_details(json!({ "all": true, "revoked": revoked }))
    );
    tracing::info!(user_id = %user.user_id, revoked, "Logged out everywhere");
    Ok(Json(LogoutResponse {
        success: true,
        revoked,
    }))
}

/// List the caller's live sessions, newest first.
#[utoipa::path(
    get,
    path = "/auth/sessions",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Active sessions", body = SessionListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_sessions(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let mut sessions: Vec<SessionInfo> = SessionRepository::new(&state.store)
        .list_active_for_user(&user.user_id, Utc::now())?
        .into_iter()
        .map(|s| SessionInfo {
            is_current: s.session_id == user.session_id,
            session_id: s.session_id,
            device: s.device,
            created_at: s.created_at,
            last_used_at: s.last_used_at,
            expires_at: s.expires_at,
        })
        .collect();
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = sessions.len();
    Ok(Json(SessionListResponse { sessions, total }))
}

/// End one of the caller's sessions.
#[utoipa::path(
    delete,
    path = "/auth/sessions/{session_id}",
    tag = "Auth",
    params(("session_id" = String, Path, description = "Session to end")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session ended", body = LogoutResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such session for this user", body = crate::error::ErrorBody)
    )
)]
pub async fn revoke_session(
    Auth(user): Auth,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let sessions = SessionRepository::new(&state.store);
    // Someone else's session is reported as missing.
    match sessions.find(&session_id)? {
        Some(session) if session.user_id == user.user_id => {}
        _ => return Err(ApiError::not_found("Session not found")),
    }

    let revoked = sessions.revoke(&session_id, Utc::now())?;
    audit_log!(
        &state.store,
        AuditEventType::SessionRevoked,
        &user,
        "session",
        session_id.as_str()
    );
    Ok(Json(LogoutResponse {
        success: true,
        revoked: usize::from(revoked),
    }))
}

/// Route guard decision for a client-side path.
///
/// The web dashboard calls this before rendering a page: `allow`,
/// `redirect_to_login` (no valid session) or `redirect_away` (signed in
/// without the required role).
#[utoipa::path(
    get,
    path = "/auth/guard",
    tag = "Auth",
    params(GuardQuery),
    responses(
        (status = 200, description = "Guard decision", body = GuardResponse)
    )
)]
pub async fn guard(
    OptionalAuth(user): OptionalAuth,
    Query(query): Query<GuardQuery>,
) -> Json<GuardResponse> {
    let access = RouteAccess::classify(&query.path);
    let role = user.as_ref().map(|u| u.role);
    Json(GuardResponse {
        decision: GuardDecision::evaluate(access, role),
        authenticated: user.is_some(),
        role,
        access,
        path: query.path,
    })
}
