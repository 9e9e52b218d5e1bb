// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cash-out requests to M-Pesa.
//!
//! A request holds the amount in `pending_cash` until an admin approves or
//! rejects it, or the owner cancels it. The destination number is sealed
//! with AES-256-GCM (bound to the withdrawal id) and only a masked hint is
//! ever returned.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    audit_log,
    auth::Auth,
    error::ApiError,
    models::{WalletSummary, WithdrawalView},
    otp::Msisdn,
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, StoredWithdrawal, WithdrawalRepository, WithdrawalStatus,
    },
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWithdrawalRequest {
    /// Amount in cents. At least 5,000 (KES 50).
    #[schema(example = 10000)]
    pub amount: i64,
    /// M-Pesa number to pay. Defaults to the account's phone.
    #[serde(default)]
    pub destination: Option<String>,
}

/// The new withdrawal and the wallet after the hold.
#[derive(Debug, Serialize, ToSchema)]
pub struct WithdrawalCreatedResponse {
    pub withdrawal: WithdrawalView,
    pub wallet: WalletSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WithdrawalListResponse {
    pub withdrawals: Vec<WithdrawalView>,
    pub total: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Request a withdrawal.
#[utoipa::path(
    post,
    path = "/withdrawals",
    tag = "Withdrawals",
    request_body = CreateWithdrawalRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Withdrawal requested", body = WithdrawalCreatedResponse),
        (status = 400, description = "Below minimum, over balance or over the daily limit", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn create_withdrawal(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(body): Json<CreateWithdrawalRequest>,
) -> Result<(StatusCode, Json<WithdrawalCreatedResponse>), ApiError> {
    let destination = match body.destination.as_deref() {
        Some(raw) => Msisdn::parse(raw)
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "invalid_phone", e.to_string()))?,
        None => user.phone.clone(),
    };

    let id = Uuid::new_v4().to_string();
    let destination_sealed = state
        .cipher
        .seal(destination.as_str(), &id)
        .map_err(ApiError::internal)?;
    let fee = StoredWithdrawal::fee_for(body.amount);
    let withdrawal = StoredWithdrawal {
        id: id.clone(),
        user_id: user.user_id.clone(),
        amount: body.amount,
        fee,
        net_amount: body.amount - fee,
        destination_sealed,
        destination_hint: destination.masked(),
        status: WithdrawalStatus::Pending,
        failure_reason: None,
        requested_at: Utc::now(),
        decided_at: None,
        decided_by: None,
    };

    let wallet = WithdrawalRepository::new(&state.store).create_with_hold(&withdrawal)?;

    tracing::info!(
        user_id = %user.user_id,
        withdrawal_id = %id,
        amount = body.amount,
        "Withdrawal requested"
    );
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::WithdrawalRequested)
            .with_user(user.user_id.as_str())
            .with_resource("withdrawal", id.as_str())
            .with_details(json!({ "amount": body.amount, "fee": fee }))
    );

    Ok((
        StatusCode::CREATED,
        Json(WithdrawalCreatedResponse {
            withdrawal: WithdrawalView::from(&withdrawal),
            wallet: WalletSummary::from(&wallet),
        }),
    ))
}

/// List the caller's withdrawals, newest first.
#[utoipa::path(
    get,
    path = "/withdrawals",
    tag = "Withdrawals",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Withdrawals", body = WithdrawalListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_withdrawals(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WithdrawalListResponse>, ApiError> {
    let withdrawals: Vec<WithdrawalView> = WithdrawalRepository::new(&state.store)
        .list_for_user(&user.user_id)?
        .iter()
        .map(WithdrawalView::from)
        .collect();
    let total = withdrawals.len();
    Ok(Json(WithdrawalListResponse { withdrawals, total }))
}

/// Get one of the caller's withdrawals.
#[utoipa::path(
    get,
    path = "/withdrawals/{withdrawal_id}",
    tag = "Withdrawals",
    params(("withdrawal_id" = String, Path, description = "Withdrawal ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Withdrawal", body = WithdrawalView),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody)
    )
)]
pub async fn get_withdrawal(
    Auth(user): Auth,
    Path(withdrawal_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WithdrawalView>, ApiError> {
    let withdrawal =
        WithdrawalRepository::new(&state.store).get_owned(&withdrawal_id, &user.user_id)?;
    Ok(Json(WithdrawalView::from(&withdrawal)))
}

/// Cancel a pending withdrawal and release its hold.
#[utoipa::path(
    post,
    path = "/withdrawals/{withdrawal_id}/cancel",
    tag = "Withdrawals",
    params(("withdrawal_id" = String, Path, description = "Withdrawal ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Cancelled", body = WithdrawalView),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "No longer pending", body = crate::error::ErrorBody)
    )
)]
pub async fn cancel_withdrawal(
    Auth(user): Auth,
    Path(withdrawal_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WithdrawalView>, ApiError> {
    let decided =
        WithdrawalRepository::new(&state.store).cancel(&withdrawal_id, &user.user_id, Utc::now())?;

    audit_log!(
        &state.store,
        AuditEventType::WithdrawalCancelled,
        &user,
        "withdrawal",
        withdrawal_id.as_str()
    );
    Ok(Json(WithdrawalView::from(&decided.withdrawal)))
}
