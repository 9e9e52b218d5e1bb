// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Authentication events, account changes, withdrawals and administrative
//! actions are appended to the `audit_events` table. Keys start with a
//! fixed-width UTC timestamp, so a date range is a single range scan.

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::db::{index_key, sortable_timestamp, write_json, Store, AUDIT_EVENTS};
use super::StoreResult;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // OTP events
    OtpRequested,
    OtpVerified,
    OtpFailed,
    OtpDeliveryFailed,

    // Session events
    UserCreated,
    SessionCreated,
    TokenRefreshed,
    RefreshTokenReused,
    SessionRevoked,

    // Account events
    ProfileUpdated,
    AccountDeleted,

    // Wallet events
    WalletCredited,
    WithdrawalRequested,
    WithdrawalCancelled,
    WithdrawalApproved,
    WithdrawalRejected,

    // Admin events
    UserStatusChanged,
    UserRoleChanged,
    PermissionDenied,
    AdminAccess,
}

impl AuditEventType {
    pub fn from_str(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Resource affected (user id, withdrawal id, masked phone, ...).
    pub resource_id: Option<String>,
    /// Resource type (user, session, withdrawal, phone).
    pub resource_type: Option<String>,
    /// IP address of the request (if available).
    pub ip_address: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            ip_address: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Set the user ID.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the resource.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Set the IP address.
    pub fn with_ip(mut self, ip: Option<impl Into<String>>) -> Self {
        self.ip_address = ip.map(Into::into);
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    fn key(&self) -> String {
        index_key(&[&sortable_timestamp(self.timestamp), &self.event_id])
    }
}

/// Audit query filter. Dates are inclusive UTC days.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub user_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        let eq = |want: &Option<String>, have: &Option<String>| {
            want.as_ref().is_none_or(|w| have.as_ref() == Some(w))
        };
        eq(&self.user_id, &event.user_id)
            && eq(&self.resource_type, &event.resource_type)
            && eq(&self.resource_id, &event.resource_id)
            && self.event_type.is_none_or(|t| t == event.event_type)
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    store: &'a Store,
}

impl<'a> AuditRepository<'a> {
    /// Create a new audit repository.
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Log an audit event.
    pub fn log(&self, event: &AuditEvent) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_EVENTS)?;
            write_json(&mut table, &event.key(), event)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Matching events, newest first, plus the total number of matches.
    pub fn query(
        &self,
        query: &AuditQuery,
        limit: usize,
        offset: usize,
    ) -> StoreResult<(Vec<AuditEvent>, usize)> {
        // Keys begin with `YYYY-MM-DD`, so whole days are plain string bounds.
        let start = query
            .start_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let end = query
            .end_date
            .and_then(|d| d.succ_opt())
            .map(|d| d.format("%Y-%m-%d").to_string());

        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(AUDIT_EVENTS)?;
        let range = match end.as_deref() {
            Some(end) => table.range(start.as_str()..end)?,
            None => table.range(start.as_str()..)?,
        };

        let mut matching = Vec::new();
        for entry in range.rev() {
            let (_, value) = entry?;
            let event: AuditEvent = serde_json::from_slice(value.value())?;
            if query.matches(&event) {
                matching.push(event);
            }
        }
        let total = matching.len();
        Ok((matching.into_iter().skip(offset).take(limit).collect(), total))
    }
}

/// Record an audit event, logging (not propagating) storage failures.
#[macro_export]
macro_rules! audit_log {
    ($store:expr, $event:expr) => {{
        let repo = $crate::storage::AuditRepository::new($store);
        if let Err(err) = repo.log(&$event) {
            tracing::warn!(error = %err, "failed to write audit event");
        }
    }};
    ($store:expr, $event_type:expr, $user:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type).with_user($user.user_id.as_str());
        $crate::audit_log!($store, event);
    }};
    ($store:expr, $event_type:expr, $user:expr, $resource_type:expr, $resource_id:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type)
            .with_user($user.user_id.as_str())
            .with_resource($resource_type, $resource_id);
        $crate::audit_log!($store, event);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::testing::temp_store;
    use chrono::Duration;

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::OtpVerified)
            .with_user("user_123")
            .with_resource("session", "sess_abc")
            .with_ip(Some("192.168.1.1"));

        assert_eq!(event.event_type, AuditEventType::OtpVerified);
        assert_eq!(event.user_id, Some("user_123".to_string()));
        assert_eq!(event.resource_type, Some("session".to_string()));
        assert_eq!(event.ip_address, Some("192.168.1.1".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::PermissionDenied)
            .with_user("user_123")
            .failed("Not authorized");

        assert!(!event.success);
        assert_eq!(event.error, Some("Not authorized".to_string()));
    }

    #[test]
    fn event_type_parses_snake_case() {
        assert_eq!(
            AuditEventType::from_str("withdrawal_approved"),
            Some(AuditEventType::WithdrawalApproved)
        );
        assert_eq!(AuditEventType::from_str("nope"), None);
    }

    #[test]
    fn log_and_query_newest_first() {
        let (store, _dir) = temp_store();
        let repo = AuditRepository::new(&store);

        let mut first = AuditEvent::new(AuditEventType::OtpRequested).with_resource("phone", "+254*****5678");
        first.timestamp = Utc::now() - Duration::seconds(5);
        let second = AuditEvent::new(AuditEventType::OtpVerified).with_user("user_1");
        repo.log(&first).unwrap();
        repo.log(&second).unwrap();

        let (events, total) = repo.query(&AuditQuery::default(), 10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(events[0].event_type, AuditEventType::OtpVerified);
        assert_eq!(events[1].event_type, AuditEventType::OtpRequested);
    }

    #[test]
    fn query_filters_by_user_type_and_date() {
        let (store, _dir) = temp_store();
        let repo = AuditRepository::new(&store);
        let now = Utc::now();

        let mut old = AuditEvent::new(AuditEventType::WithdrawalApproved).with_user("user_target");
        old.timestamp = now - Duration::days(3);
        repo.log(&old).unwrap();
        repo.log(&AuditEvent::new(AuditEventType::WithdrawalApproved).with_user("user_target"))
            .unwrap();
        repo.log(&AuditEvent::new(AuditEventType::WithdrawalApproved).with_user("user_other"))
            .unwrap();
        repo.log(&AuditEvent::new(AuditEventType::SessionRevoked).with_user("user_target"))
            .unwrap();

        let by_user = AuditQuery {
            user_id: Some("user_target".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.query(&by_user, 100, 0).unwrap().1, 3);

        let by_type_today = AuditQuery {
            user_id: Some("user_target".to_string()),
            event_type: Some(AuditEventType::WithdrawalApproved),
            start_date: Some(now.date_naive()),
            end_date: Some(now.date_naive()),
            ..Default::default()
        };
        assert_eq!(repo.query(&by_type_today, 100, 0).unwrap().1, 1);

        let old_day = AuditQuery {
            end_date: Some((now - Duration::days(2)).date_naive()),
            ..Default::default()
        };
        assert_eq!(repo.query(&old_day, 100, 0).unwrap().1, 1);
    }

    #[test]
    fn query_paginates() {
        let (store, _dir) = temp_store();
        let repo = AuditRepository::new(&store);
        for _ in 0..5 {
            repo.log(&AuditEvent::new(AuditEventType::AdminAccess)).unwrap();
        }
        let (page, total) = repo.query(&AuditQuery::default(), 2, 4).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 1);
    }
}
