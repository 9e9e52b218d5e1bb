// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OTP issuance and verification.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use ring::rand::SystemRandom;

use super::challenge::{OtpChallenge, OtpState};
use super::phone::Msisdn;
use super::{OtpError, CODE_LENGTH};
use crate::cache::{get_json, keys, set_json, CacheStore};
use crate::config::OtpPolicy;
use crate::crypto::{keyed_digest, numeric_code, verify_keyed_digest};
use crate::sms::{otp_message, SmsSender};

const HOUR: Duration = Duration::from_secs(3600);

/// Outcome of a successful request. `code` is only for development echo and
/// tests; callers must not log it.
#[derive(Debug, Clone)]
pub struct OtpDispatch {
    pub phone: Msisdn,
    pub challenge_id: String,
    pub expires_in: Duration,
    pub code: String,
}

pub struct OtpService {
    cache: Arc<dyn CacheStore>,
    sms: Arc<dyn SmsSender>,
    policy: OtpPolicy,
    rng: SystemRandom,
    reveal_phones: bool,
}

impl OtpService {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        sms: Arc<dyn SmsSender>,
        policy: OtpPolicy,
        reveal_phones: bool,
    ) -> Self {
        Self {
            cache,
            sms,
            policy,
            rng: SystemRandom::new(),
            reveal_phones,
        }
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    fn log_phone(&self, phone: &Msisdn) -> String {
        if self.reveal_phones {
            phone.to_string()
        } else {
            phone.masked()
        }
    }

    /// Issue a new code for `raw_phone` and text it.
    pub async fn request(&self, raw_phone: &str) -> Result<OtpDispatch, OtpError> {
        let phone = Msisdn::parse(raw_phone)?;

        let cooldown = self
            .cache
            .incr_window(&keys::otp_cooldown(&phone), self.policy.resend_cooldown)
            .await?;
        if cooldown.count > 1 {
            tracing::info!(phone = %self.log_phone(&phone), "OTP resend inside cooldown");
            return Err(OtpError::RateLimited {
                message: "Please wait before requesting another code",
                retry_after_secs: ceil_secs(cooldown.resets_in),
            });
        }

        let hourly = self
            .cache
            .incr_window(&keys::otp_hourly(&phone), HOUR)
            .await?;
        if hourly.count > self.policy.max_requests_per_hour {
            tracing::warn!(phone = %self.log_phone(&phone), count = hourly.count, "OTP hourly cap reached");
            return Err(OtpError::RateLimited {
                message: "Too many verification codes requested, try again later",
                retry_after_secs: ceil_secs(hourly.resets_in),
            });
        }

        let code = numeric_code(&self.rng, CODE_LENGTH as u32)?;
        let now = Utc::now();
        let challenge_id = uuid::Uuid::new_v4().to_string();
        let code_digest = keyed_digest(
            self.policy.secret.as_bytes(),
            &OtpChallenge::digest_input(&challenge_id, &phone, &code),
        )?;
        let mut challenge = OtpChallenge {
            id: challenge_id.clone(),
            phone: phone.clone(),
            code_digest,
            state: OtpState::Requested,
            created_at: now,
            expires_at: now + ttl_delta(self.policy.ttl),
        };

        let challenge_key = keys::otp_challenge(&phone);
        set_json(self.cache.as_ref(), &challenge_key, &challenge, self.policy.ttl).await?;
        // A fresh challenge starts with a clean failure count.
        self.cache.delete(&keys::otp_failures(&phone)).await?;

        let ttl_minutes = (self.policy.ttl.as_secs() / 60).max(1);
        match self.sms.send(&phone, &otp_message(&code, ttl_minutes)).await {
            Ok(receipt) => {
                challenge.advance(OtpState::Delivered);
                set_json(self.cache.as_ref(), &challenge_key, &challenge, self.policy.ttl).await?;
                tracing::info!(
                    phone = %self.log_phone(&phone),
                    challenge_id = %challenge_id,
                    provider = receipt.provider,
                    message_id = %receipt.message_id,
                    "OTP delivered"
                );
            }
            Err(err) => {
                challenge.advance(OtpState::Failed);
                self.cache.delete(&challenge_key).await?;
                // Let the user retry straight away after a provider failure.
                self.cache.delete(&keys::otp_cooldown(&phone)).await?;
                tracing::error!(
                    phone = %self.log_phone(&phone),
                    challenge_id = %challenge_id,
                    error = %err,
                    "OTP delivery failed"
                );
                return Err(OtpError::Delivery(err));
            }
        }

        Ok(OtpDispatch {
            phone,
            challenge_id,
            expires_in: self.policy.ttl,
            code,
        })
    }

    /// Check `code` against the live challenge for `raw_phone` and consume it.
    pub async fn verify(&self, raw_phone: &str, code: &str) -> Result<Msisdn, OtpError> {
        let phone = Msisdn::parse(raw_phone)?;
        let code = code.trim();
        if code.len() != CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OtpError::InvalidCode);
        }

        let challenge_key = keys::otp_challenge(&phone);
        let Some(challenge) =
            get_json::<OtpChallenge>(self.cache.as_ref(), &challenge_key).await?
        else {
            return Err(OtpError::Expired);
        };
        if challenge.is_expired(Utc::now()) || challenge.state != OtpState::Delivered {
            self.cache.delete(&challenge_key).await?;
            return Err(OtpError::Expired);
        }

        if !self.code_matches(&challenge, &phone, code) {
            let failures = self
                .cache
                .incr_window(&keys::otp_failures(&phone), self.policy.ttl)
                .await?;
            if failures.count >= self.policy.max_attempts {
                self.cache.delete(&challenge_key).await?;
                self.cache.delete(&keys::otp_failures(&phone)).await?;
                tracing::warn!(phone = %self.log_phone(&phone), "OTP burned after too many attempts");
                return Err(OtpError::AttemptsExceeded);
            }
            return Err(OtpError::Mismatch {
                attempts_remaining: self.policy.max_attempts - failures.count,
            });
        }

        // Only the caller whose take returns the challenge wins.
        let Some(raw) = self.cache.take(&challenge_key).await? else {
            return Err(OtpError::Expired);
        };
        let taken: OtpChallenge = serde_json::from_str(&raw).map_err(crate::cache::CacheError::from)?;
        if taken.id != challenge.id {
            // Replaced by a newer request between our read and take.
            let remaining = (taken.expires_at - Utc::now()).to_std().unwrap_or_default();
            if !remaining.is_zero() {
                set_json(self.cache.as_ref(), &challenge_key, &taken, remaining).await?;
            }
            return Err(OtpError::Expired);
        }

        self.cache.delete(&keys::otp_failures(&phone)).await?;
        tracing::info!(phone = %self.log_phone(&phone), challenge_id = %taken.id, "OTP verified");
        Ok(phone)
    }

    fn code_matches(&self, challenge: &OtpChallenge, phone: &Msisdn, code: &str) -> bool {
        verify_keyed_digest(
            self.policy.secret.as_bytes(),
            &OtpChallenge::digest_input(&challenge.id, phone, code),
            &challenge.code_digest,
        )
    }
}

fn ttl_delta(ttl: Duration) -> TimeDelta {
    TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::minutes(5))
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
