// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-IP request limits.
//!
//! Fixed-window counters live in the cache store, so limits hold across
//! instances when Redis is configured. Two windows apply:
//!
//! - every route: `RATE_LIMIT_MAX_REQUESTS` per `RATE_LIMIT_WINDOW_MS`
//!   per client IP
//! - OTP routes: `AUTH_RATE_LIMIT_MAX_REQUESTS` per
//!   `AUTH_RATE_LIMIT_WINDOW_MS` per client IP, method and path
//!
//! Responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset` for the tightest window that applied. If the cache
//! store is unreachable requests are let through and the failure is logged.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::cache::{keys, CacheResult, CacheStore};
use crate::config::RateLimitPolicy;
use crate::error::ApiError;
use crate::state::AppState;

static LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Client address resolved from the socket, or from proxy headers when
/// `TRUST_PROXY_HEADERS` is set.
///
/// The rate-limit middleware stores it in request extensions; as an
/// extractor it reuses that value or resolves it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

impl ClientIp {
    pub fn to_option_string(self) -> Option<String> {
        self.0.map(|ip| ip.to_string())
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(ip) = parts.extensions.get::<ClientIp>() {
            return Ok(*ip);
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(client_ip(
            &parts.headers,
            peer,
            state.config.trust_proxy_headers,
        )))
    }
}

/// Resolve the caller's IP.
///
/// With `trust_proxy` the order is `X-Forwarded-For` (first hop), then
/// `X-Real-IP`, then the peer address. Without it the headers are ignored.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if !trust_proxy {
        return peer.map(|addr| addr.ip());
    }
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Some(ip) = forwarded
            .to_str()
            .ok()
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return Some(ip);
        }
    }
    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
    {
        return Some(ip);
    }
    peer.map(|addr| addr.ip())
}

/// State of one window after counting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

impl RateLimitStatus {
    pub fn exceeded(&self, count: u64) -> bool {
        count > self.limit
    }

    fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in [
            (&LIMIT, self.limit),
            (&REMAINING, self.remaining),
            (&RESET, self.reset_secs),
        ] {
            if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
                headers.insert(name.clone(), value);
            }
        }
    }
}

/// Count one hit against `scope`/`client` under `policy`.
/// Returns the window status and whether the hit is over the limit.
pub async fn hit(
    cache: &dyn CacheStore,
    scope: &str,
    client: &str,
    policy: RateLimitPolicy,
) -> CacheResult<(RateLimitStatus, bool)> {
    let window = cache
        .incr_window(&keys::rate_limit(scope, client), policy.window)
        .await?;
    let status = RateLimitStatus {
        limit: policy.max_requests,
        remaining: policy.max_requests.saturating_sub(window.count),
        reset_secs: window.resets_in.as_secs().max(1),
    };
    Ok((status, status.exceeded(window.count)))
}

fn is_otp_route(path: &str) -> bool {
    path.starts_with("/auth/otp/")
}

/// Middleware enforcing both windows.
pub async fn limit_requests(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer, state.config.trust_proxy_headers);
    request.extensions_mut().insert(ClientIp(ip));
    let client = ip.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());

    let mut applied = None;
    let mut checks = vec![("global".to_string(), client.clone(), state.config.rate_limit)];
    if is_otp_route(request.uri().path()) {
        let client_route = format!("{client}:{}:{}", request.method(), request.uri().path());
        checks.push(("auth".to_string(), client_route, state.config.auth_rate_limit));
    }

    for (scope, key, policy) in checks {
        match hit(state.cache.as_ref(), &scope, &key, policy).await {
            Ok((status, true)) => {
                tracing::warn!(client = %client, scope = %scope, "rate limit exceeded");
                let mut response = ApiError::too_many_requests(
                    "rate_limited",
                    "Too many requests, please slow down",
                    status.reset_secs,
                )
                .into_response();
                status.apply(response.headers_mut());
                return response;
            }
            Ok((status, false)) => applied = Some(status),
            Err(err) => {
                tracing::warn!(error = %err, scope = %scope, "rate limit check failed, allowing request");
            }
        }
    }

    let mut response = next.run(request).await;
    if let Some(status) = applied {
        status.apply(response.headers_mut());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::time::Duration;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(peer), true),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn client_ip_ignores_headers_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(peer), false),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(client_ip(&headers, None, false), None);
    }

    #[test]
    fn client_ip_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, None, true), Some("198.51.100.2".parse().unwrap()));

        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer), true),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(client_ip(&HeaderMap::new(), None, true), None);
    }

    #[tokio::test]
    async fn hit_counts_down_and_trips() {
        let cache = MemoryCache::new(100);
        let policy = RateLimitPolicy {
            window: Duration::from_secs(60),
            max_requests: 2,
        };
        let (first, over) = hit(&cache, "global", "1.2.3.4", policy).await.unwrap();
        assert!(!over);
        assert_eq!(first.remaining, 1);
        let (_, over) = hit(&cache, "global", "1.2.3.4", policy).await.unwrap();
        assert!(!over);
        let (third, over) = hit(&cache, "global", "1.2.3.4", policy).await.unwrap();
        assert!(over);
        assert_eq!(third.remaining, 0);
        assert!(third.reset_secs <= 60);

        // Other clients have their own window.
        let (_, over) = hit(&cache, "global", "5.6.7.8", policy).await.unwrap();
        assert!(!over);
    }

    #[test]
    fn otp_routes_are_detected() {
        assert!(is_otp_route("/auth/otp/request"));
        assert!(!is_otp_route("/auth/refresh"));
    }
}
