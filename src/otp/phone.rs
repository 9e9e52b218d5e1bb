// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Kenyan mobile numbers (MSISDN).
//!
//! Every phone number that enters the system is normalised to E.164 form
//! (`+254` followed by nine digits starting with `7` or `1`) before it is
//! used as a cache key, a store index or an SMS destination.
//!
//! Accepted inputs:
//!
//! | Input | Canonical |
//! |-------|-----------|
//! | `+254712345678` | `+254712345678` |
//! | `254712345678` | `+254712345678` |
//! | `0712345678` | `+254712345678` |
//! | `712345678` | `+254712345678` |
//! | `+254 712-345-678` | `+254712345678` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

const COUNTRY_CODE: &str = "254";
const SUBSCRIBER_DIGITS: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number contains invalid characters")]
    InvalidCharacters,
    #[error("phone number must be a Kenyan mobile number (+2547XXXXXXXX or +2541XXXXXXXX)")]
    NotKenyanMobile,
}

/// A validated Kenyan mobile number in E.164 form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "+254712345678")]
pub struct Msisdn(String);

impl Msisdn {
    pub fn parse(input: &str) -> Result<Self, PhoneError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PhoneError::Empty);
        }

        let mut digits = String::with_capacity(trimmed.len());
        for (idx, ch) in trimmed.chars().enumerate() {
            match ch {
                '0'..='9' => digits.push(ch),
                '+' if idx == 0 => {}
                ' ' | '-' | '(' | ')' => {}
                _ => return Err(PhoneError::InvalidCharacters),
            }
        }

        let subscriber = if let Some(rest) = digits.strip_prefix(COUNTRY_CODE) {
            rest
        } else if let Some(rest) = digits.strip_prefix('0') {
            rest
        } else {
            digits.as_str()
        };

        if subscriber.len() != SUBSCRIBER_DIGITS || !matches!(subscriber.as_bytes()[0], b'7' | b'1')
        {
            return Err(PhoneError::NotKenyanMobile);
        }

        Ok(Self(format!("+{COUNTRY_CODE}{subscriber}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Masked form for responses and logs: `+254*****5678`.
    pub fn masked(&self) -> String {
        let tail = &self.0[self.0.len() - 4..];
        format!("+{COUNTRY_CODE}*****{tail}")
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Msisdn {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Msisdn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Msisdn::parse(&raw).map_err(serde::de::Error::custom)
    }
}
