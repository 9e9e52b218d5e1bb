// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The signed-in user's own account.
//!
//! Profiles are cached in the cache store for five minutes and the entry is
//! dropped whenever the account changes.

use std::time::Duration;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::{
    audit_log,
    auth::Auth,
    cache::{get_json, keys, set_json},
    error::ApiError,
    models::UserProfile,
    state::AppState,
    storage::{AuditEvent, AuditEventType, SessionRepository, UserRepository, UserStatus},
};

const PROFILE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Exact phrase required to delete an account.
pub const DELETE_CONFIRMATION: &str = "DELETE MY ACCOUNT";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    /// Display name, 2 to 50 characters.
    #[schema(example = "Wanjiku")]
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeleteAccountRequest {
    /// Must be `DELETE MY ACCOUNT`.
    pub confirmation: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteAccountResponse {
    pub success: bool,
    /// Sessions ended by the deletion.
    pub sessions_revoked: usize,
}

fn validate_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(2..=50).contains(&len) {
        return Err(ApiError::bad_request(
            "Name must be between 2 and 50 characters",
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(ApiError::bad_request("Name contains invalid characters"));
    }
    Ok(name.to_string())
}

/// Best-effort: a stale entry expires on its own.
async fn invalidate_profile(state: &AppState, user_id: &str) {
    if let Err(e) = state.cache.delete(&keys::user_profile(user_id)).await {
        tracing::warn!(error = %e, user_id = %user_id, "failed to drop cached profile");
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the caller's profile.
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_me(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, ApiError> {
    let key = keys::user_profile(&user.user_id);
    match get_json::<UserProfile>(state.cache.as_ref(), &key).await {
        Ok(Some(profile)) => return Ok(Json(profile)),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "profile cache read failed"),
    }

    let stored = UserRepository::new(&state.store).get(&user.user_id)?;
    let profile = UserProfile::masked(&stored);
    if let Err(e) = set_json(state.cache.as_ref(), &key, &profile, PROFILE_CACHE_TTL).await {
        tracing::warn!(error = %e, "profile cache write failed");
    }
    Ok(Json(profile))
}

/// Update the caller's display name.
#[utoipa::path(
    patch,
    path = "/users/me",
    tag = "Users",
    request_body = UpdateProfileRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 400, description = "Invalid name", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn update_me(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let name = validate_name(&body.name)?;
    let updated = UserRepository::new(&state.store).update(&user.user_id, |u| {
        u.name = Some(name);
    })?;
    invalidate_profile(&state, &user.user_id).await;

    audit_log!(
        &state.store,
        AuditEventType::ProfileUpdated,
        &user,
        "user",
        user.user_id.as_str()
    );
    Ok(Json(UserProfile::masked(&updated)))
}

/// Delete the caller's account.
///
/// The account is marked deleted (not erased) and every session ends.
#[utoipa::path(
    delete,
    path = "/users/me",
    tag = "Users",
    request_body = DeleteAccountRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Account deleted", body = DeleteAccountResponse),
        (status = 400, description = "Confirmation phrase missing", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn delete_me(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(body): Json<DeleteAccountRequest>,
) -> Result<Json<DeleteAccountResponse>, ApiError> {
    if body.confirmation != DELETE_CONFIRMATION {
        return Err(ApiError::bad_request(format!(
            "Type \"{DELETE_CONFIRMATION}\" to confirm"
        )));
    }

    UserRepository::new(&state.store).set_status(&user.user_id, UserStatus::Deleted)?;
    let sessions_revoked =
        SessionRepository::new(&state.store).revoke_all_for_user(&user.user_id, Utc::now())?;
    invalidate_profile(&state, &user.user_id).await;

    tracing::info!(user_id = %user.user_id, sessions_revoked, "Account deleted");
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::AccountDeleted)
            .with_user(user.user_id.as_str())
            .with_resource("user", user.user_id.as_str())
            .with_details(json!({ "sessions_revoked": sessions_revoked }))
    );

    Ok(Json(DeleteAccountResponse {
        success: true,
        sessions_revoked,
    }))
}
