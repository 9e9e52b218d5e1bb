// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{
    auth::Auth, error::ApiError, models::WalletSummary, state::AppState,
    storage::WalletRepository,
};

/// Get the caller's wallet.
#[utoipa::path(
    get,
    path = "/wallet",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Balances and withdrawal eligibility", body = WalletSummary),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Wallet not found", body = crate::error::ErrorBody)
    )
)]
pub async fn get_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletSummary>, ApiError> {
    let wallet = WalletRepository::new(&state.store).get(&user.user_id)?;
    Ok(Json(WalletSummary::from(&wallet)))
}
