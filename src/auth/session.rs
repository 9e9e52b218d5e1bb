// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session creation and refresh-token rotation.
//!
//! Only a keyed digest of the current refresh token is stored. Every refresh
//! replaces it, so presenting an older refresh token is detected as reuse and
//! ends the session.

use chrono::Utc;
use uuid::Uuid;

use super::tokens::SignedToken;
use super::AuthError;
use crate::audit_log;
use crate::crypto::{keyed_digest, verify_keyed_digest};
use crate::state::AppState;
use crate::storage::{
    AuditEvent, AuditEventType, DeviceInfo, SessionRepository, StoreError, StoredSession,
    StoredUser, UserRepository, UserStatus,
};

/// Tokens handed to the client after sign-in or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub session_id: String,
    pub access: SignedToken,
    pub refresh: SignedToken,
}

fn refresh_digest(state: &AppState, token: &str) -> Result<String, AuthError> {
    keyed_digest(state.config.jwt.refresh_secret.as_bytes(), token)
        .map_err(|e| AuthError::InternalError(e.to_string()))
}

/// Create a session for `user` and sign its first token pair.
pub fn start_session(
    state: &AppState,
    user: &StoredUser,
    device: DeviceInfo,
) -> Result<TokenPair, AuthError> {
    let session_id = Uuid::new_v4().to_string();
    let access = state.tokens.issue_access(&user.id, &session_id, user.role)?;
    let refresh = state.tokens.issue_refresh(&user.id, &session_id, user.role)?;

    let now = Utc::now();
    SessionRepository::new(&state.store).create(&StoredSession {
        session_id: session_id.clone(),
        user_id: user.id.clone(),
        refresh_token_digest: refresh_digest(state, &refresh.token)?,
        device,
        created_at: now,
        last_used_at: now,
        expires_at: refresh.expires_at,
        revoked_at: None,
    })?;

    tracing::info!(user_id = %user.id, session_id = %session_id, "Session created");
    Ok(TokenPair {
        session_id,
        access,
        refresh,
    })
}

/// Exchange a refresh token for a new pair on the same session.
pub fn refresh_session(
    state: &AppState,
    refresh_token: &str,
) -> Result<(TokenPair, StoredUser), AuthError> {
    let claims = state.tokens.verify_refresh(refresh_token)?;
    let sessions = SessionRepository::new(&state.store);
    let now = Utc::now();

    let session = sessions
        .find(&claims.sid)?
        .filter(|s| s.user_id == claims.sub && s.is_active(now))
        .ok_or(AuthError::SessionRevoked)?;

    if !verify_keyed_digest(
        state.config.jwt.refresh_secret.as_bytes(),
        refresh_token,
        &session.refresh_token_digest,
    ) {
        revoke_for_reuse(state, &session);
        return Err(AuthError::SessionRevoked);
    }

    let user = UserRepository::new(&state.store)
        .find(&claims.sub)?
        .ok_or(AuthError::UnknownUser)?;
    match user.status {
        UserStatus::Active => {}
        UserStatus::Suspended => return Err(AuthError::AccountSuspended),
        UserStatus::Deleted => return Err(AuthError::AccountDeleted),
    }

    let access = state.tokens.issue_access(&user.id, &session.session_id, user.role)?;
    let refresh = state.tokens.issue_refresh(&user.id, &session.session_id, user.role)?;
    let rotated = sessions.rotate(
        &session.session_id,
        &session.refresh_token_digest,
        &refresh_digest(state, &refresh.token)?,
        refresh.expires_at,
        now,
    );
    match rotated {
        Ok(_) => {}
        // Lost a race with another refresh of the same token.
        Err(StoreError::Conflict(_)) => {
            revoke_for_reuse(state, &session);
            return Err(AuthError::SessionRevoked);
        }
        Err(err) => return Err(err.into()),
    }

    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::TokenRefreshed)
            .with_user(user.id.as_str())
            .with_resource("session", session.session_id.as_str())
    );
    Ok((
        TokenPair {
            session_id: session.session_id,
            access,
            refresh,
        },
        user,
    ))
}

fn revoke_for_reuse(state: &AppState, session: &StoredSession) {
    tracing::warn!(
        user_id = %session.user_id,
        session_id = %session.session_id,
        "Refresh token reuse detected, revoking session"
    );
    if let Err(err) = SessionRepository::new(&state.store).revoke(&session.session_id, Utc::now()) {
        tracing::error!(error = %err, "failed to revoke session after refresh reuse");
    }
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::RefreshTokenReused)
            .with_user(session.user_id.as_str())
            .with_resource("session", session.session_id.as_str())
            .failed("refresh token reuse")
    );
}
