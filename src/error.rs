// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthError;
use crate::cache::CacheError;
use crate::otp::OtpError;
use crate::storage::StoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<u64>,
}

/// Error payload shared by every failing endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human readable message.
    pub error: String,
    /// Stable machine readable code.
    pub error_code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    pub fn too_many_requests(
        code: &'static str,
        message: impl Into<String>,
        retry_after_secs: u64,
    ) -> Self {
        Self {
            retry_after: Some(retry_after_secs),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, code, message)
        }
    }

    pub fn bad_gateway(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, code, message)
    }

    /// Internal failure. The detail is logged and never sent to the client.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code.to_string(),
        });
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InternalError(detail) => Self::internal(detail),
            other => Self::new(other.status_code(), other.error_code(), other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::not_found(format!("{what} not found")),
            StoreError::Conflict(msg) => Self::conflict(msg),
            StoreError::Rejected(msg) => Self::bad_request(msg),
            other => Self::internal(other),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        tracing::error!(error = %err, "cache store unavailable");
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "cache_unavailable",
            "Temporarily unavailable, please retry",
        )
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        let message = err.to_string();
        match err {
            OtpError::InvalidPhone(_) => Self::new(StatusCode::BAD_REQUEST, "invalid_phone", message),
            OtpError::InvalidCode => Self::new(StatusCode::BAD_REQUEST, "invalid_code", message),
            OtpError::RateLimited {
                retry_after_secs, ..
            } => Self::too_many_requests("rate_limited", message, retry_after_secs),
            OtpError::Expired => Self::unauthorized("otp_expired", message),
            OtpError::Mismatch { attempts_remaining } => Self::unauthorized(
                "otp_mismatch",
                format!("{message} ({attempts_remaining} attempts remaining)"),
            ),
            OtpError::AttemptsExceeded => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "otp_attempts_exceeded", message)
            }
            OtpError::Delivery(detail) => {
                tracing::warn!(error = %detail, "OTP SMS delivery failed");
                Self::bad_gateway(
                    "sms_delivery_failed",
                    "Could not send the verification SMS, please try again",
                )
            }
            OtpError::Cache(cache) => cache.into(),
            OtpError::Crypto(detail) => Self::internal(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_code() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.code, "not_found");
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.code, "validation_error");

        let limited = ApiError::too_many_requests("rate_limited", "slow down", 30);
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.retry_after, Some(30));
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data","error_code":"validation_error"}"#);
    }

    #[tokio::test]
    async fn rate_limit_sets_retry_after() {
        let response = ApiError::too_many_requests("rate_limited", "wait", 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
    }

    #[test]
    fn internal_hides_detail() {
        let err = ApiError::internal("redb exploded");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn store_errors_map_to_http() {
        let err: ApiError = StoreError::NotFound("withdrawal".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = StoreError::Rejected("insufficient balance".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "insufficient balance");

        let err: ApiError = StoreError::Conflict("already decided".to_string()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn otp_errors_map_to_http() {
        let err: ApiError = OtpError::Expired.into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, "otp_expired");

        let err: ApiError = OtpError::Mismatch { attempts_remaining: 3 }.into();
        assert_eq!(err.code, "otp_mismatch");
        assert!(err.message.contains('3'));

        let err: ApiError = OtpError::RateLimited {
            message: "wait",
            retry_after_secs: 45,
        }
        .into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after, Some(45));

        let err: ApiError = OtpError::AttemptsExceeded.into();
        assert_eq!(err.code, "otp_attempts_exceeded");

        let err: ApiError = OtpError::InvalidPhone(crate::otp::PhoneError::NotKenyanMobile).into();
        assert_eq!(err.code, "invalid_phone");

        let err: ApiError =
            OtpError::Delivery(crate::sms::SmsError::Request("timeout".to_string())).into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.code, "sms_delivery_failed");
    }

    #[test]
    fn auth_errors_keep_their_code() {
        let err: ApiError = AuthError::InsufficientPermissions.into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, "insufficient_permissions");
    }
}
