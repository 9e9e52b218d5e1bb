// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HS256 access and refresh tokens.
//!
//! Access and refresh tokens are signed with different secrets and carry a
//! `typ` claim, so one can never stand in for the other.

use chrono::{TimeDelta, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use super::{AuthError, Role};
use crate::config::{JwtConfig, TOKEN_AUDIENCE, TOKEN_ISSUER};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// A freshly signed token and its lifetime in seconds.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_in: i64,
    pub expires_at: chrono::DateTime<Utc>,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: TimeDelta,
}

impl KeyPair {
    fn new(secret: &str, ttl: std::time::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::days(7)),
        }
    }
}

/// Creates and verifies JWTs.
pub struct TokenIssuer {
    access: KeyPair,
    refresh: KeyPair,
    validation: Validation,
}

impl TokenIssuer {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        Self {
            access: KeyPair::new(&config.access_secret, config.access_ttl),
            refresh: KeyPair::new(&config.refresh_secret, config.refresh_ttl),
            validation,
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access.ttl.num_seconds()
    }

    pub fn refresh_ttl(&self) -> TimeDelta {
        self.refresh.ttl
    }

    pub fn issue_access(&self, user_id: &str, session_id: &str, role: Role) -> Result<SignedToken, AuthError> {
        self.issue(&self.access, TokenKind::Access, user_id, session_id, role)
    }

    pub fn issue_refresh(&self, user_id: &str, session_id: &str, role: Role) -> Result<SignedToken, AuthError> {
        self.issue(&self.refresh, TokenKind::Refresh, user_id, session_id, role)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(&self.access, TokenKind::Access, token)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(&self.refresh, TokenKind::Refresh, token)
    }

    fn issue(
        &self,
        keys: &KeyPair,
        typ: TokenKind,
        user_id: &str,
        session_id: &str,
        role: Role,
    ) -> Result<SignedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + keys.ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            role,
            typ,
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::default(), &claims, &keys.encoding)
            .map_err(|e| AuthError::InternalError(format!("token signing failed: {e}")))?;
        Ok(SignedToken {
            token,
            expires_in: keys.ttl.num_seconds(),
            expires_at,
        })
    }

    fn verify(&self, keys: &KeyPair, expected: TokenKind, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &keys.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
                _ => AuthError::MalformedToken,
            }
        })?;
        if data.claims.typ != expected {
            return Err(AuthError::InvalidTokenType);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&AppConfig::for_tests().jwt)
    }

    #[test]
    fn access_token_round_trip() {
        let issuer = issuer();
        let signed = issuer.issue_access("user_1", "sess_1", Role::User).unwrap();
        assert_eq!(signed.expires_in, 15 * 60);

        let claims = issuer.verify_access(&signed.token).unwrap();
        assert_eq!(claims.sub, "user_1");
        assert_eq!(claims.sid, "sess_1");
        assert_eq!(claims.iss, TOKEN_ISSUER);
        assert_eq!(claims.aud, TOKEN_AUDIENCE);
    }

    #[test]
    fn token_types_are_not_interchangeable() {
        let issuer = issuer();
        let access = issuer.issue_access("u", "s", Role::User).unwrap();
        let refresh = issuer.issue_refresh("u", "s", Role::User).unwrap();

        // Different secrets: the signature check fails first.
        assert!(issuer.verify_refresh(&access.token).is_err());
        assert!(issuer.verify_access(&refresh.token).is_err());
        assert!(issuer.verify_refresh(&refresh.token).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let mut other_config = AppConfig::for_tests().jwt;
        other_config.access_secret = "another-secret-that-is-long-enough-000".to_string();
        let other = TokenIssuer::new(&other_config);

        let token = other.issue_access("u", "s", Role::Admin).unwrap().token;
        assert!(matches!(
            issuer().verify_access(&token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = AppConfig::for_tests().jwt;
        let past = Utc::now().timestamp() - 3_600;
        let claims = Claims {
            sub: "u".to_string(),
            sid: "s".to_string(),
            role: Role::User,
            typ: TokenKind::Access,
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            iat: past - 60,
            exp: past,
            jti: "j".to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.access_secret.as_bytes()),
        )
        .unwrap();
        assert!(matches!(issuer().verify_access(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            issuer().verify_access("not.a.jwt"),
            Err(AuthError::MalformedToken)
        ));
    }
}
