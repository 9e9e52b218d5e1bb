// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints for the web dashboard.
//!
//! These endpoints require the Admin role and provide:
//! - System statistics
//! - User management (status, role, wallet credits)
//! - Withdrawal review
//! - Audit log queries
//!
//! The whole subtree also sits behind the `require_admin` middleware.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit_log,
    auth::{AdminOnly, AuthenticatedUser, Role},
    cache::{get_json, keys, set_json},
    error::ApiError,
    models::{UserProfile, WalletSummary, WithdrawalView},
    otp::Msisdn,
    sms::{withdrawal_approved_message, withdrawal_rejected_message},
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, AuditQuery, AuditRepository, SessionRepository,
        StoredWithdrawal, UserFilter, UserRepository, UserStatus, WalletRepository,
        WithdrawalRepository, WithdrawalStatus,
    },
};

const STATS_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;

// ============================================================================
// Request/Response Types
// ============================================================================

/// User counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserStats {
    pub total: usize,
    pub active: usize,
    pub suspended: usize,
    pub deleted: usize,
    pub admins: usize,
}

/// Withdrawal counts and amounts (cents).
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub cancelled: usize,
    /// Sum of pending withdrawal amounts.
    pub pending_amount: i64,
    /// Sum of approved withdrawal amounts.
    pub approved_amount: i64,
}

/// System statistics response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SystemStatsResponse {
    pub users: UserStats,
    pub withdrawals: WithdrawalStats,
    /// Sessions that are neither revoked nor expired.
    pub active_sessions: usize,
    /// Server uptime in seconds.
    pub uptime_seconds: u64,
    /// When the counts were computed (they are cached for a minute).
    pub generated_at: DateTime<Utc>,
}

/// Query parameters for the user list.
#[derive(Debug, Deserialize, IntoParams)]
pub struct UserListParams {
    /// `active`, `suspended` or `deleted`.
    pub status: Option<String>,
    /// `user` or `admin`.
    pub role: Option<String>,
    /// Substring of phone or name.
    pub search: Option<String>,
    /// Page size (default 50, max 200).
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserProfile>,
    pub total: usize,
    pub has_more: bool,
}

/// One user with wallet, sessions and recent withdrawals.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminUserDetail {
    pub user: UserProfile,
    pub wallet: Option<WalletSummary>,
    pub active_sessions: usize,
    /// Most recent withdrawals, newest first.
    pub recent_withdrawals: Vec<WithdrawalView>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserStatusRequest {
    /// `active`, `suspended` or `deleted`.
    #[schema(example = "suspended")]
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRoleRequest {
    /// `user` or `admin`.
    #[schema(example = "admin")]
    pub role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreditWalletRequest {
    /// Amount in cents, positive.
    pub amount: i64,
    /// Why the credit was made, kept in the audit log.
    pub reason: String,
}

/// Query parameters for the withdrawal review queue.
#[derive(Debug, Deserialize, IntoParams)]
pub struct WithdrawalListParams {
    /// `pending`, `approved`, `rejected` or `cancelled`.
    pub status: Option<String>,
    /// Page size (default 50, max 200).
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Withdrawal with the decrypted payout number, for admins.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminWithdrawalItem {
    #[serde(flatten)]
    pub withdrawal: WithdrawalView,
    /// Full M-Pesa number, if it could be decrypted.
    pub destination_msisdn: Option<String>,
    /// Admin who decided the withdrawal.
    pub decided_by: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminWithdrawalListResponse {
    pub withdrawals: Vec<AdminWithdrawalItem>,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectWithdrawalRequest {
    /// Shown to the user in the rejection SMS.
    pub reason: String,
}

/// Outcome of an approve or reject.
#[derive(Debug, Serialize, ToSchema)]
pub struct WithdrawalDecisionResponse {
    pub withdrawal: WithdrawalView,
    pub wallet: WalletSummary,
    /// Whether the user was notified by SMS.
    pub notified: bool,
}

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Start date (YYYY-MM-DD format).
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format).
    pub end_date: Option<String>,
    /// Filter by user ID.
    pub user_id: Option<String>,
    /// Filter by event type.
    pub event_type: Option<String>,
    /// Filter by resource type.
    pub resource_type: Option<String>,
    /// Filter by resource ID.
    pub resource_id: Option<String>,
    /// Maximum number of results (default 100).
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

/// Response for audit log queries.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Audit events matching the query.
    pub events: Vec<AuditEvent>,
    /// Total count (before limit/offset).
    pub total: usize,
    /// Whether there are more results.
    pub has_more: bool,
}

// ============================================================================
// Helpers
// ============================================================================

fn page(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    (
        limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE),
        offset.unwrap_or(0),
    )
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("Invalid {field} format. Use YYYY-MM-DD.")))
}

fn compute_stats(state: &AppState) -> Result<SystemStatsResponse, ApiError> {
    let mut users = UserStats::default();
    for user in UserRepository::new(&state.store).list_all()? {
        users.total += 1;
        match user.status {
            UserStatus::Active => users.active += 1,
            UserStatus::Suspended => users.suspended += 1,
            UserStatus::Deleted => users.deleted += 1,
        }
        if user.role == Role::Admin {
            users.admins += 1;
        }
    }

    let mut withdrawals = WithdrawalStats::default();
    for w in WithdrawalRepository::new(&state.store).list_all()? {
        withdrawals.total += 1;
        match w.status {
            WithdrawalStatus::Pending => {
                withdrawals.pending += 1;
                withdrawals.pending_amount += w.amount;
            }
            WithdrawalStatus::Approved => {
                withdrawals.approved += 1;
                withdrawals.approved_amount += w.amount;
            }
            WithdrawalStatus::Rejected => withdrawals.rejected += 1,
            WithdrawalStatus::Cancelled => withdrawals.cancelled += 1,
        }
    }

    Ok(SystemStatsResponse {
        users,
        withdrawals,
        active_sessions: SessionRepository::new(&state.store).count_active(Utc::now())?,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        generated_at: Utc::now(),
    })
}

/// Drop cached read models after an admin change. Best-effort.
async fn invalidate(state: &AppState, user_id: Option<&str>) {
    let mut stale = vec![keys::admin_stats()];
    if let Some(user_id) = user_id {
        stale.push(keys::user_profile(user_id));
    }
    for key in stale {
        if let Err(e) = state.cache.delete(&key).await {
            tracing::warn!(error = %e, key = %key, "cache invalidation failed");
        }
    }
}

fn refuse_self_change(admin: &AuthenticatedUser, user_id: &str) -> Result<(), ApiError> {
    if admin.user_id == user_id {
        return Err(ApiError::bad_request(
            "Admins cannot change their own status or role",
        ));
    }
    Ok(())
}

fn admin_item(state: &AppState, withdrawal: &StoredWithdrawal) -> AdminWithdrawalItem {
    let destination_msisdn = match state
        .cipher
        .open(&withdrawal.destination_sealed, &withdrawal.id)
    {
        Ok(msisdn) => Some(msisdn),
        Err(e) => {
            tracing::error!(withdrawal_id = %withdrawal.id, error = %e, "cannot decrypt destination");
            None
        }
    };
    AdminWithdrawalItem {
        withdrawal: WithdrawalView::from(withdrawal),
        destination_msisdn,
        decided_by: withdrawal.decided_by.clone(),
    }
}

/// Text the withdrawal owner. Failures are logged, not retried.
async fn notify_owner(state: &AppState, user_id: &str, body: &str) -> bool {
    let user = match UserRepository::new(&state.store).get(user_id) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "cannot notify: user lookup failed");
            return false;
        }
    };
    match state.sms.send(&user.phone, body).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                phone = %state.log_phone(&user.phone),
                error = %e,
                "withdrawal notification SMS failed"
            );
            false
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get system statistics.
///
/// Counts are computed at most once a minute and served from the cache
/// store in between. Admin only.
#[utoipa::path(
    get,
    path = "/admin/stats",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "System statistics", body = SystemStatsResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn get_system_stats(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<SystemStatsResponse>, ApiError> {
    let key = keys::admin_stats();
    let cached = match get_json::<SystemStatsResponse>(state.cache.as_ref(), &key).await {
        Ok(cached) => cached,
        Err(e) => {
            tracing::warn!(error = %e, "stats cache read failed");
            None
        }
    };

    let mut stats = match cached {
        Some(stats) => stats,
        None => {
            let stats = compute_stats(&state)?;
            if let Err(e) = set_json(state.cache.as_ref(), &key, &stats, STATS_CACHE_TTL).await {
                tracing::warn!(error = %e, "stats cache write failed");
            }
            stats
        }
    };
    stats.uptime_seconds = state.started_at.elapsed().as_secs();

    audit_log!(&state.store, AuditEventType::AdminAccess, &user);
    Ok(Json(stats))
}

/// List users with optional filters.
#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "Admin",
    params(UserListParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Users", body = UserListResponse),
        (status = 400, description = "Invalid filter", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_users(
    AdminOnly(user): AdminOnly,
    Query(params): Query<UserListParams>,
    State(state): State<AppState>,
) -> Result<Json<UserListResponse>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(|s| UserStatus::from_str(s).ok_or_else(|| ApiError::bad_request("Invalid status")))
        .transpose()?;
    let role = params
        .role
        .as_deref()
        .map(|r| Role::from_str(r).ok_or_else(|| ApiError::bad_request("Invalid role")))
        .transpose()?;
    let filter = UserFilter {
        status,
        role,
        search: params.search.clone(),
    };
    let (limit, offset) = page(params.limit, params.offset);

    let (users, total) = UserRepository::new(&state.store).list(&filter, limit, offset)?;
    audit_log!(&state.store, AuditEventType::AdminAccess, &user);

    Ok(Json(UserListResponse {
        users: users.iter().map(UserProfile::unmasked).collect(),
        has_more: offset.saturating_add(limit) < total,
        total,
    }))
}

/// Get one user with wallet and activity.
#[utoipa::path(
    get,
    path = "/admin/users/{user_id}",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User detail", body = AdminUserDetail),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found", body = crate::error::ErrorBody)
    )
)]
pub async fn get_user(
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AdminUserDetail>, ApiError> {
    let user = UserRepository::new(&state.store).get(&user_id)?;
    let wallet = WalletRepository::new(&state.store)
        .get(&user_id)
        .ok()
        .map(|w| WalletSummary::from(&w));
    let active_sessions = SessionRepository::new(&state.store)
        .list_active_for_user(&user_id, Utc::now())?
        .len();
    let recent_withdrawals = WithdrawalRepository::new(&state.store)
        .list_for_user(&user_id)?
        .iter()
        .take(10)
        .map(WithdrawalView::from)
        .collect();

    audit_log!(&state.store, AuditEventType::AdminAccess, &admin, "user", user_id.as_str());
    Ok(Json(AdminUserDetail {
        user: UserProfile::unmasked(&user),
        wallet,
        active_sessions,
        recent_withdrawals,
    }))
}

/// Change a user's status.
///
/// Suspending or deleting an account ends all of its sessions.
#[utoipa::path(
    patch,
    path = "/admin/users/{user_id}/status",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = UpdateUserStatusRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Updated user", body = UserProfile),
        (status = 400, description = "Invalid status", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found", body = crate::error::ErrorBody)
    )
)]
pub async fn update_user_status(
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<UpdateUserStatusRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let status = UserStatus::from_str(&body.status)
        .ok_or_else(|| ApiError::bad_request("Status must be active, suspended or deleted"))?;
    refuse_self_change(&admin, &user_id)?;

    let user = UserRepository::new(&state.store).set_status(&user_id, status)?;
    let revoked = if status == UserStatus::Active {
        0
    } else {
        SessionRepository::new(&state.store).revoke_all_for_user(&user_id, Utc::now())?
    };
    invalidate(&state, Some(&user_id)).await;

    tracing::info!(admin_id = %admin.user_id, user_id = %user_id, status = ?status, revoked, "User status changed");
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::UserStatusChanged)
            .with_user(admin.user_id.as_str())
            .with_resource("user", user_id.as_str())
            .with_details(json!({ "status": status, "sessions_revoked": revoked }))
    );
    Ok(Json(UserProfile::unmasked(&user)))
}

/// Change a user's role.
#[utoipa::path(
    patch,
    path = "/admin/users/{user_id}/role",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = UpdateUserRoleRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Updated user", body = UserProfile),
        (status = 400, description = "Invalid role", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "User not found", body = crate::error::ErrorBody)
    )
)]
pub async fn update_user_role(
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<UpdateUserRoleRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let role = Role::from_str(&body.role)
        .ok_or_else(|| ApiError::bad_request("Role must be user or admin"))?;
    refuse_self_change(&admin, &user_id)?;

    let user = UserRepository::new(&state.store).set_role(&user_id, role)?;
    invalidate(&state, Some(&user_id)).await;

    tracing::info!(admin_id = %admin.user_id, user_id = %user_id, role = %role, "User role changed");
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::UserRoleChanged)
            .with_user(admin.user_id.as_str())
            .with_resource("user", user_id.as_str())
            .with_details(json!({ "role": role }))
    );
    Ok(Json(UserProfile::unmasked(&user)))
}

/// Credit earnings to a user's wallet.
#[utoipa::path(
    post,
    path = "/admin/users/{user_id}/wallet/credit",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = CreditWalletRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Wallet after the credit", body = WalletSummary),
        (status = 400, description = "Invalid amount or reason", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "Wallet not found", body = crate::error::ErrorBody)
    )
)]
pub async fn credit_wallet(
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<CreditWalletRequest>,
) -> Result<Json<WalletSummary>, ApiError> {
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::bad_request("A reason is required"));
    }
    let wallet = WalletRepository::new(&state.store).credit(&user_id, body.amount, Utc::now())?;

    tracing::info!(admin_id = %admin.user_id, user_id = %user_id, amount = body.amount, "Wallet credited");
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::WalletCredited)
            .with_user(admin.user_id.as_str())
            .with_resource("wallet", user_id.as_str())
            .with_details(json!({ "amount": body.amount, "reason": reason }))
    );
    Ok(Json(WalletSummary::from(&wallet)))
}

/// List withdrawals for review, newest first.
#[utoipa::path(
    get,
    path = "/admin/withdrawals",
    tag = "Admin",
    params(WithdrawalListParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Withdrawals", body = AdminWithdrawalListResponse),
        (status = 400, description = "Invalid status filter", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_withdrawals(
    AdminOnly(admin): AdminOnly,
    Query(params): Query<WithdrawalListParams>,
    State(state): State<AppState>,
) -> Result<Json<AdminWithdrawalListResponse>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            WithdrawalStatus::from_str(s).ok_or_else(|| ApiError::bad_request("Invalid status"))
        })
        .transpose()?;
    let (limit, offset) = page(params.limit, params.offset);

    let (withdrawals, total) = WithdrawalRepository::new(&state.store).list(status, limit, offset)?;
    audit_log!(&state.store, AuditEventType::AdminAccess, &admin);

    Ok(Json(AdminWithdrawalListResponse {
        withdrawals: withdrawals.iter().map(|w| admin_item(&state, w)).collect(),
        has_more: offset.saturating_add(limit) < total,
        total,
    }))
}

/// Approve a pending withdrawal.
///
/// Debits the balance, releases the hold and texts the user. Payout itself
/// happens outside this service.
#[utoipa::path(
    post,
    path = "/admin/withdrawals/{withdrawal_id}/approve",
    tag = "Admin",
    params(("withdrawal_id" = String, Path, description = "Withdrawal ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Approved", body = WithdrawalDecisionResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "Withdrawal not found", body = crate::error::ErrorBody),
        (status = 409, description = "Already decided", body = crate::error::ErrorBody)
    )
)]
pub async fn approve_withdrawal(
    AdminOnly(admin): AdminOnly,
    Path(withdrawal_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WithdrawalDecisionResponse>, ApiError> {
    let decided =
        WithdrawalRepository::new(&state.store).approve(&withdrawal_id, &admin.user_id, Utc::now())?;
    let withdrawal = &decided.withdrawal;
    invalidate(&state, None).await;

    tracing::info!(
        admin_id = %admin.user_id,
        withdrawal_id = %withdrawal.id,
        amount = withdrawal.amount,
        "Withdrawal approved"
    );
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::WithdrawalApproved)
            .with_user(admin.user_id.as_str())
            .with_resource("withdrawal", withdrawal.id.as_str())
            .with_details(json!({ "amount": withdrawal.amount, "owner": withdrawal.user_id }))
    );

    // Mention the destination the money goes to, masked.
    let destination = state
        .cipher
        .open(&withdrawal.destination_sealed, &withdrawal.id)
        .ok()
        .and_then(|raw| Msisdn::parse(&raw).ok())
        .map(|msisdn| msisdn.masked())
        .unwrap_or_else(|| withdrawal.destination_hint.clone());
    let notified = notify_owner(
        &state,
        &withdrawal.user_id,
        &withdrawal_approved_message(withdrawal.net_amount, &destination),
    )
    .await;

    Ok(Json(WithdrawalDecisionResponse {
        withdrawal: WithdrawalView::from(withdrawal),
        wallet: WalletSummary::from(&decided.wallet),
        notified,
    }))
}

/// Reject a pending withdrawal and release its hold.
#[utoipa::path(
    post,
    path = "/admin/withdrawals/{withdrawal_id}/reject",
    tag = "Admin",
    params(("withdrawal_id" = String, Path, description = "Withdrawal ID")),
    request_body = RejectWithdrawalRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Rejected", body = WithdrawalDecisionResponse),
        (status = 400, description = "Missing reason", body = crate::error::ErrorBody),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "Withdrawal not found", body = crate::error::ErrorBody),
        (status = 409, description = "Already decided", body = crate::error::ErrorBody)
    )
)]
pub async fn reject_withdrawal(
    AdminOnly(admin): AdminOnly,
    Path(withdrawal_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RejectWithdrawalRequest>,
) -> Result<Json<WithdrawalDecisionResponse>, ApiError> {
    let reason = body.reason.trim();
    if reason.is_empty() || reason.chars().count() > 500 {
        return Err(ApiError::bad_request(
            "Reason must be between 1 and 500 characters",
        ));
    }

    let decided = WithdrawalRepository::new(&state.store).reject(
        &withdrawal_id,
        &admin.user_id,
        reason,
        Utc::now(),
    )?;
    let withdrawal = &decided.withdrawal;
    invalidate(&state, None).await;

    tracing::info!(admin_id = %admin.user_id, withdrawal_id = %withdrawal.id, "Withdrawal rejected");
    audit_log!(
        &state.store,
        AuditEvent::new(AuditEventType::WithdrawalRejected)
            .with_user(admin.user_id.as_str())
            .with_resource("withdrawal", withdrawal.id.as_str())
            .with_details(json!({ "reason": reason, "owner": withdrawal.user_id }))
    );

    let notified = notify_owner(
        &state,
        &withdrawal.user_id,
        &withdrawal_rejected_message(withdrawal.amount, reason),
    )
    .await;

    Ok(Json(WithdrawalDecisionResponse {
        withdrawal: WithdrawalView::from(withdrawal),
        wallet: WalletSummary::from(&decided.wallet),
        notified,
    }))
}

/// Query audit logs.
///
/// Search and filter audit log entries. Supports date range, user ID,
/// event type, and resource filtering. Admin only.
#[utoipa::path(
    get,
    path = "/admin/audit/events",
    tag = "Admin",
    params(AuditQueryParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn query_audit_logs(
    AdminOnly(admin_user): AdminOnly,
    Query(params): Query<AuditQueryParams>,
    State(state): State<AppState>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    // Default date range: today only
    let today = Utc::now().date_naive();
    let start_date = match params.start_date.as_deref() {
        Some(raw) => parse_date(raw, "start_date")?,
        None => today,
    };
    let end_date = match params.end_date.as_deref() {
        Some(raw) => parse_date(raw, "end_date")?,
        None => today,
    };
    if end_date < start_date {
        return Err(ApiError::bad_request("end_date is before start_date"));
    }

    let event_type = params
        .event_type
        .as_deref()
        .map(|t| {
            AuditEventType::from_str(t)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown event_type: {t}")))
        })
        .transpose()?;

    let query = AuditQuery {
        start_date: Some(start_date),
        end_date: Some(end_date),
        user_id: params.user_id.clone(),
        event_type,
        resource_type: params.resource_type.clone(),
        resource_id: params.resource_id.clone(),
    };
    let limit = params.limit.unwrap_or(100).min(1000); // Max 1000
    let offset = params.offset.unwrap_or(0);

    let (events, total) = AuditRepository::new(&state.store).query(&query, limit, offset)?;
    let has_more = offset.saturating_add(limit) < total;

    // Log the admin access
    audit_log!(&state.store, AuditEventType::AdminAccess, &admin_user);

    Ok(Json(AuditLogResponse {
        events,
        total,
        has_more,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_clamped() {
        assert_eq!(page(None, None), (DEFAULT_PAGE, 0));
        assert_eq!(page(Some(0), Some(5)), (1, 5));
        assert_eq!(page(Some(10_000), None), (MAX_PAGE, 0));
    }

    #[test]
    fn dates_must_be_iso() {
        assert!(parse_date("2026-03-01", "start_date").is_ok());
        let err = parse_date("01/03/2026", "start_date").unwrap_err();
        assert!(err.message.contains("start_date"));
    }
}
