// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stored OTP challenge and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phone::Msisdn;

/// Lifecycle: `requested → delivered → {verified | expired | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpState {
    Requested,
    Delivered,
    Verified,
    Expired,
    Failed,
}

impl OtpState {
    pub fn can_transition(self, next: OtpState) -> bool {
        use OtpState::*;
        matches!(
            (self, next),
            (Requested, Delivered)
                | (Requested, Failed)
                | (Requested, Expired)
                | (Delivered, Verified)
                | (Delivered, Expired)
                | (Delivered, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Expired | Self::Failed)
    }
}

/// A pending code for one phone. The plaintext code is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub id: String,
    pub phone: Msisdn,
    pub code_digest: String,
    pub state: OtpState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OtpChallenge {
    /// Message fed to the keyed digest. Binding the challenge id means a
    /// digest from one challenge never validates another.
    pub fn digest_input(id: &str, phone: &Msisdn, code: &str) -> String {
        format!("{id}:{phone}:{code}")
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Move to `next`, returning `false` (and leaving the state alone) for an
    /// illegal transition.
    pub fn advance(&mut self, next: OtpState) -> bool {
        if self.state.can_transition(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge() -> OtpChallenge {
        let now = Utc::now();
        OtpChallenge {
            id: "c1".to_string(),
            phone: Msisdn::parse("+254712345678").unwrap(),
            code_digest: "digest".to_string(),
            state: OtpState::Requested,
            created_at: now,
            expires_at: now + Duration::minutes(5),
        }
    }

    #[test]
    fn happy_path_transitions() {
        let mut c = challenge();
        assert!(c.advance(OtpState::Delivered));
        assert!(c.advance(OtpState::Verified));
        assert!(c.state.is_terminal());
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut c = challenge();
        assert!(c.advance(OtpState::Failed));
        assert!(!c.advance(OtpState::Delivered));
        assert!(!c.advance(OtpState::Verified));
        assert_eq!(c.state, OtpState::Failed);
    }

    #[test]
    fn cannot_verify_undelivered() {
        let mut c = challenge();
        assert!(!c.advance(OtpState::Verified));
        assert_eq!(c.state, OtpState::Requested);
    }

    #[test]
    fn expiry_is_inclusive_of_deadline() {
        let c = challenge();
        assert!(!c.is_expired(c.created_at));
        assert!(c.is_expired(c.expires_at));
    }

    #[test]
    fn serialized_state_is_lowercase() {
        let json = serde_json::to_value(challenge()).unwrap();
        assert_eq!(json["state"], "requested");
        assert_eq!(json["phone"], "+254712345678");
    }
}
