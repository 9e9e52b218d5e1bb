// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read once from the environment at startup (a `.env` file
//! in the working directory is honoured) and shared through [`AppState`].
//! Any invalid value aborts startup with a [`ConfigError`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_ENV` | `development`, `staging` or `production` | `development` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATABASE_PATH` | redb database file | `./data/citypulse.redb` |
//! | `REDIS_URL` | Redis for OTP state and rate limits | in-memory (not allowed in production) |
//! | `JWT_SECRET` | Access token signing secret (min 32 chars) | Required |
//! | `JWT_REFRESH_SECRET` | Refresh token signing secret | `JWT_SECRET` |
//! | `JWT_EXPIRES_IN` | Access token lifetime (`30m`, `12h`, `7d`, ...) | `7d` |
//! | `REFRESH_TOKEN_EXPIRES_IN` | Refresh token lifetime | `30d` |
//! | `OTP_SECRET` | Keyed digest secret for OTP codes (min 20 chars) | Required |
//! | `OTP_EXPIRY_MINUTES` | OTP lifetime | `5` |
//! | `OTP_RESEND_COOLDOWN_SECS` | Minimum gap between OTP requests per phone | `60` |
//! | `OTP_MAX_REQUESTS_PER_HOUR` | OTP requests per phone per hour | `5` |
//! | `OTP_MAX_ATTEMPTS` | Wrong codes before a challenge is burned | `5` |
//! | `ENCRYPTION_KEY` | Base64 32-byte key for withdrawal destinations | Required |
//! | `SMS_PROVIDER` | `console` or `twilio` | `console` |
//! | `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` / `TWILIO_FROM_NUMBER` | Twilio credentials | Required for `twilio` |
//! | `TWILIO_API_BASE_URL` | Twilio REST base URL | `https://api.twilio.com` |
//! | `ADMIN_PHONES` | Comma-separated phones that sign up as admins | empty |
//! | `RATE_LIMIT_WINDOW_MS` / `RATE_LIMIT_MAX_REQUESTS` | Per-IP limit on every route | `60000` / `100` |
//! | `AUTH_RATE_LIMIT_WINDOW_MS` / `AUTH_RATE_LIMIT_MAX_REQUESTS` | Per-IP limit on OTP routes | `600000` / `5` |
//! | `CORS_ALLOWED_ORIGINS` | Comma-separated origins | permissive |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files for HTTPS | plain HTTP |
//! | `SESSION_SWEEP_INTERVAL_SECS` | Expired session cleanup period | `3600` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//!
//! [`AppState`]: crate::state::AppState

use std::path::PathBuf;
use std::time::Duration;

use base64ct::{Base64, Encoding};
use thiserror::Error;
use url::Url;

use crate::otp::phone::Msisdn;

pub const TOKEN_ISSUER: &str = "citypulse";
pub const TOKEN_AUDIENCE: &str = "citypulse-api";

const MIN_JWT_SECRET_LEN: usize = 32;
const MIN_OTP_SECRET_LEN: usize = 20;
const DEFAULT_TWILIO_BASE_URL: &str = "https://api.twilio.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// OTP issuance and verification policy.
#[derive(Debug, Clone)]
pub struct OtpPolicy {
    pub secret: String,
    pub ttl: Duration,
    pub resend_cooldown: Duration,
    pub max_requests_per_hour: u64,
    pub max_attempts: u64,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub base_url: Url,
}

#[derive(Debug, Clone)]
pub enum SmsConfig {
    Console,
    Twilio(TwilioConfig),
}

/// Fixed-window request limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_requests: u64,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub redis_url: Option<String>,
    pub jwt: JwtConfig,
    pub otp: OtpPolicy,
    pub encryption_key: [u8; 32],
    pub sms: SmsConfig,
    pub admin_phones: Vec<Msisdn>,
    pub rate_limit: RateLimitPolicy,
    pub auth_rate_limit: RateLimitPolicy,
    pub cors_origins: Vec<String>,
    /// Resolve client IPs from `X-Forwarded-For`/`X-Real-IP`. Only set
    /// behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
    pub tls: Option<TlsPaths>,
    pub session_sweep_interval: Duration,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let environment = match or_default("APP_ENV", "development").as_str() {
            "development" | "dev" => Environment::Development,
            "staging" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            other => return Err(ConfigError::invalid("APP_ENV", format!("unknown environment '{other}'"))),
        };

        let port = parse_number::<u16>("PORT", &or_default("PORT", "8080"))?;

        let redis_url = match get("REDIS_URL") {
            Some(raw) => {
                Url::parse(&raw).map_err(|e| ConfigError::invalid("REDIS_URL", e.to_string()))?;
                Some(raw)
            }
            None if environment == Environment::Production => {
                return Err(ConfigError::Missing("REDIS_URL"));
            }
            None => None,
        };

        let access_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if access_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::invalid(
                "JWT_SECRET",
                format!("must be at least {MIN_JWT_SECRET_LEN} characters"),
            ));
        }
        let refresh_secret = match get("JWT_REFRESH_SECRET") {
            Some(secret) if secret.len() < MIN_JWT_SECRET_LEN => {
                return Err(ConfigError::invalid(
                    "JWT_REFRESH_SECRET",
                    format!("must be at least {MIN_JWT_SECRET_LEN} characters"),
                ));
            }
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_REFRESH_SECRET not set; refresh tokens share the access secret");
                access_secret.clone()
            }
        };
        let jwt = JwtConfig {
            access_secret,
            refresh_secret,
            access_ttl: parse_ttl("JWT_EXPIRES_IN", &or_default("JWT_EXPIRES_IN", "7d"))?,
            refresh_ttl: parse_ttl(
                "REFRESH_TOKEN_EXPIRES_IN",
                &or_default("REFRESH_TOKEN_EXPIRES_IN", "30d"),
            )?,
        };

        let otp_secret = get("OTP_SECRET").ok_or(ConfigError::Missing("OTP_SECRET"))?;
        if otp_secret.len() < MIN_OTP_SECRET_LEN {
            return Err(ConfigError::invalid(
                "OTP_SECRET",
                format!("must be at least {MIN_OTP_SECRET_LEN} characters"),
            ));
        }
        let otp = OtpPolicy {
            secret: otp_secret,
            ttl: Duration::from_secs(
                60 * parse_positive("OTP_EXPIRY_MINUTES", &or_default("OTP_EXPIRY_MINUTES", "5"))?,
            ),
            resend_cooldown: Duration::from_secs(parse_positive(
                "OTP_RESEND_COOLDOWN_SECS",
                &or_default("OTP_RESEND_COOLDOWN_SECS", "60"),
            )?),
            max_requests_per_hour: parse_positive(
                "OTP_MAX_REQUESTS_PER_HOUR",
                &or_default("OTP_MAX_REQUESTS_PER_HOUR", "5"),
            )?,
            max_attempts: parse_positive("OTP_MAX_ATTEMPTS", &or_default("OTP_MAX_ATTEMPTS", "5"))?,
        };

        let encryption_key = parse_key(
            &get("ENCRYPTION_KEY").ok_or(ConfigError::Missing("ENCRYPTION_KEY"))?,
        )?;

        let sms = match or_default("SMS_PROVIDER", "console").as_str() {
            "console" => {
                if environment == Environment::Production {
                    tracing::warn!("SMS_PROVIDER=console in production; codes will only be logged");
                }
                SmsConfig::Console
            }
            "twilio" => {
                let base_url = or_default("TWILIO_API_BASE_URL", DEFAULT_TWILIO_BASE_URL);
                SmsConfig::Twilio(TwilioConfig {
                    account_sid: get("TWILIO_ACCOUNT_SID")
                        .ok_or(ConfigError::Missing("TWILIO_ACCOUNT_SID"))?,
                    auth_token: get("TWILIO_AUTH_TOKEN")
                        .ok_or(ConfigError::Missing("TWILIO_AUTH_TOKEN"))?,
                    from_number: get("TWILIO_FROM_NUMBER")
                        .ok_or(ConfigError::Missing("TWILIO_FROM_NUMBER"))?,
                    base_url: Url::parse(&base_url)
                        .map_err(|e| ConfigError::invalid("TWILIO_API_BASE_URL", e.to_string()))?,
                })
            }
            other => {
                return Err(ConfigError::invalid(
                    "SMS_PROVIDER",
                    format!("unknown provider '{other}'"),
                ))
            }
        };

        let admin_phones = split_list(get("ADMIN_PHONES"))
            .into_iter()
            .map(|raw| {
                Msisdn::parse(&raw).map_err(|e| ConfigError::invalid("ADMIN_PHONES", format!("{raw}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rate_limit = RateLimitPolicy {
            window: Duration::from_millis(parse_positive(
                "RATE_LIMIT_WINDOW_MS",
                &or_default("RATE_LIMIT_WINDOW_MS", "60000"),
            )?),
            max_requests: parse_positive(
                "RATE_LIMIT_MAX_REQUESTS",
                &or_default("RATE_LIMIT_MAX_REQUESTS", "100"),
            )?,
        };
        let auth_rate_limit = RateLimitPolicy {
            window: Duration::from_millis(parse_positive(
                "AUTH_RATE_LIMIT_WINDOW_MS",
                &or_default("AUTH_RATE_LIMIT_WINDOW_MS", "600000"),
            )?),
            max_requests: parse_positive(
                "AUTH_RATE_LIMIT_MAX_REQUESTS",
                &or_default("AUTH_RATE_LIMIT_MAX_REQUESTS", "5"),
            )?,
        };

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("TLS_KEY_PATH")),
            (None, Some(_)) => return Err(ConfigError::Missing("TLS_CERT_PATH")),
        };

        Ok(Self {
            environment,
            host: or_default("HOST", "0.0.0.0"),
            port,
            database_path: PathBuf::from(or_default("DATABASE_PATH", "./data/citypulse.redb")),
            redis_url,
            jwt,
            otp,
            encryption_key,
            sms,
            admin_phones,
            rate_limit,
            auth_rate_limit,
            cors_origins: split_list(get("CORS_ALLOWED_ORIGINS")),
            trust_proxy_headers: parse_bool(
                "TRUST_PROXY_HEADERS",
                &or_default("TRUST_PROXY_HEADERS", "false"),
            )?,
            tls,
            session_sweep_interval: Duration::from_secs(parse_positive(
                "SESSION_SWEEP_INTERVAL_SECS",
                &or_default("SESSION_SWEEP_INTERVAL_SECS", "3600"),
            )?),
        })
    }

    pub fn is_admin_phone(&self, phone: &Msisdn) -> bool {
        self.admin_phones.iter().any(|admin| admin == phone)
    }
}

/// Log format from `LOG_FORMAT`, read before the rest of the configuration
/// so that configuration warnings are already formatted correctly.
pub fn log_format_from_env() -> LogFormat {
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

/// Parse a lifetime like `90s`, `15m`, `12h`, `7d` or `2w`.
pub fn parse_ttl(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ConfigError::invalid(var, "missing unit (s, m, h, d or w)"))?;
    let (value, unit) = raw.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| ConfigError::invalid(var, format!("'{raw}' is not a duration")))?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        _ => return Err(ConfigError::invalid(var, format!("unknown unit '{unit}'"))),
    };
    if value == 0 {
        return Err(ConfigError::invalid(var, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value * multiplier))
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(var, format!("'{raw}' is not a valid number")))
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::invalid(var, format!("expected a boolean, got '{other}'"))),
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match parse_number::<u64>(var, raw)? {
        0 => Err(ConfigError::invalid(var, "must be greater than zero")),
        n => Ok(n),
    }
}

fn parse_key(raw: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = Base64::decode_vec(raw.trim())
        .map_err(|_| ConfigError::invalid("ENCRYPTION_KEY", "not valid base64"))?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::invalid("ENCRYPTION_KEY", "must decode to exactly 32 bytes"))
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
impl AppConfig {
    /// Development configuration with fixed secrets and generous limits.
    pub(crate) fn for_tests() -> Self {
        Self {
            environment: Environment::Development,
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path: PathBuf::from("unused.redb"),
            redis_url: None,
            jwt: JwtConfig {
                access_secret: "test-access-secret-0123456789abcdef".to_string(),
                refresh_secret: "test-refresh-secret-0123456789abcdef".to_string(),
                access_ttl: Duration::from_secs(15 * 60),
                refresh_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            },
            otp: OtpPolicy {
                secret: "test-otp-secret-0123456789".to_string(),
                ttl: Duration::from_secs(5 * 60),
                resend_cooldown: Duration::from_secs(60),
                max_requests_per_hour: 5,
                max_attempts: 5,
            },
            encryption_key: [7u8; 32],
            sms: SmsConfig::Console,
            admin_phones: Vec::new(),
            rate_limit: RateLimitPolicy {
                window: Duration::from_secs(60),
                max_requests: 1000,
            },
            auth_rate_limit: RateLimitPolicy {
                window: Duration::from_secs(600),
                max_requests: 100,
            },
            cors_origins: Vec::new(),
            trust_proxy_headers: false,
            tls: None,
            session_sweep_interval: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("JWT_SECRET", "a".repeat(32)),
            ("OTP_SECRET", "b".repeat(20)),
            ("ENCRYPTION_KEY", Base64::encode_string(&[1u8; 32])),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_required_secrets() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 8080);
        assert_eq!(config.otp.ttl, Duration::from_secs(300));
        assert_eq!(config.otp.resend_cooldown, Duration::from_secs(60));
        assert_eq!(config.jwt.access_ttl, Duration::from_secs(7 * 86_400));
        assert_eq!(config.jwt.refresh_ttl, Duration::from_secs(30 * 86_400));
        assert_eq!(config.jwt.refresh_secret, config.jwt.access_secret);
        assert!(matches!(config.sms, SmsConfig::Console));
        assert_eq!(config.auth_rate_limit.max_requests, 5);
        assert!(config.redis_url.is_none());
        assert!(config.tls.is_none());
        assert!(!config.trust_proxy_headers);
    }

    #[test]
    fn proxy_header_trust_is_opt_in() {
        let mut env = base_env();
        env.insert("TRUST_PROXY_HEADERS", "true".to_string());
        assert!(load(&env).unwrap().trust_proxy_headers);

        env.insert("TRUST_PROXY_HEADERS", "sometimes".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { var: "TRUST_PROXY_HEADERS", .. })
        ));
    }

    #[test]
    fn missing_secret_is_reported() {
        let mut env = base_env();
        env.remove("OTP_SECRET");
        assert!(matches!(load(&env), Err(ConfigError::Missing("OTP_SECRET"))));
    }

    #[test]
    fn short_jwt_secret_rejected() {
        let mut env = base_env();
        env.insert("JWT_SECRET", "short".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { var: "JWT_SECRET", .. })
        ));
    }

    #[test]
    fn production_requires_redis() {
        let mut env = base_env();
        env.insert("APP_ENV", "production".to_string());
        assert!(matches!(load(&env), Err(ConfigError::Missing("REDIS_URL"))));

        env.insert("REDIS_URL", "redis://cache:6379".to_string());
        assert_eq!(load(&env).unwrap().environment, Environment::Production);
    }

    #[test]
    fn twilio_requires_credentials() {
        let mut env = base_env();
        env.insert("SMS_PROVIDER", "twilio".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Missing("TWILIO_ACCOUNT_SID"))
        ));

        env.insert("TWILIO_ACCOUNT_SID", "AC123".to_string());
        env.insert("TWILIO_AUTH_TOKEN", "token".to_string());
        env.insert("TWILIO_FROM_NUMBER", "+15005550006".to_string());
        match load(&env).unwrap().sms {
            SmsConfig::Twilio(twilio) => {
                assert_eq!(twilio.account_sid, "AC123");
                assert_eq!(twilio.base_url.as_str(), "https://api.twilio.com/");
            }
            SmsConfig::Console => panic!("expected twilio"),
        }
    }

    #[test]
    fn admin_phones_are_normalised() {
        let mut env = base_env();
        env.insert("ADMIN_PHONES", "0712345678, +254110000001".to_string());
        let config = load(&env).unwrap();
        assert!(config.is_admin_phone(&Msisdn::parse("+254712345678").unwrap()));
        assert!(config.is_admin_phone(&Msisdn::parse("0110000001").unwrap()));
        assert!(!config.is_admin_phone(&Msisdn::parse("0799999999").unwrap()));

        env.insert("ADMIN_PHONES", "not-a-phone".to_string());
        assert!(load(&env).is_err());
    }

    #[test]
    fn encryption_key_must_be_32_bytes() {
        let mut env = base_env();
        env.insert("ENCRYPTION_KEY", Base64::encode_string(&[1u8; 16]));
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { var: "ENCRYPTION_KEY", .. })
        ));
    }

    #[test]
    fn tls_paths_must_come_in_pairs() {
        let mut env = base_env();
        env.insert("TLS_CERT_PATH", "/certs/server.pem".to_string());
        assert!(matches!(load(&env), Err(ConfigError::Missing("TLS_KEY_PATH"))));
        env.insert("TLS_KEY_PATH", "/certs/server.key".to_string());
        assert!(load(&env).unwrap().tls.is_some());
    }

    #[test]
    fn ttl_units() {
        assert_eq!(parse_ttl("T", "90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_ttl("T", "15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_ttl("T", "12h").unwrap(), Duration::from_secs(43_200));
        assert_eq!(parse_ttl("T", "2w").unwrap(), Duration::from_secs(1_209_600));
        assert!(parse_ttl("T", "7").is_err());
        assert!(parse_ttl("T", "7y").is_err());
        assert!(parse_ttl("T", "d").is_err());
        assert!(parse_ttl("T", "0m").is_err());
    }
}
