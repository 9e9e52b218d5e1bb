// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # SMS Delivery
//!
//! Outbound text messages (OTP codes and payout notifications) go through the
//! [`SmsSender`] trait. The provider is picked once at startup from
//! `SMS_PROVIDER`:
//!
//! - `console`: writes the message to the log (development)
//! - `twilio`: Twilio Programmable Messaging REST API
//!
//! Delivery failures are reported to the caller and logged; they are not
//! retried.

pub mod console;
pub mod twilio;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SmsConfig;
use crate::otp::phone::Msisdn;

pub use console::ConsoleSms;
pub use twilio::TwilioSms;

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("SMS provider request failed: {0}")]
    Request(String),

    #[error("SMS provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("SMS provider response was invalid: {0}")]
    InvalidResponse(String),
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsReceipt {
    pub provider: &'static str,
    pub message_id: String,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn send(&self, to: &Msisdn, body: &str) -> Result<SmsReceipt, SmsError>;
}

/// Build the configured sender.
pub fn from_config(config: &SmsConfig) -> Result<Arc<dyn SmsSender>, SmsError> {
    Ok(match config {
        SmsConfig::Console => Arc::new(ConsoleSms),
        SmsConfig::Twilio(twilio) => Arc::new(TwilioSms::new(twilio.clone())?),
    })
}

pub fn otp_message(code: &str, ttl_minutes: u64) -> String {
    format!("Your CityPulse verification code is: {code}. Valid for {ttl_minutes} minutes.")
}

pub fn withdrawal_approved_message(amount_cents: i64, destination: &str) -> String {
    format!(
        "Your CityPulse withdrawal of {} has been approved and will be sent to {destination}.",
        format_kes(amount_cents)
    )
}

pub fn withdrawal_rejected_message(amount_cents: i64, reason: &str) -> String {
    format!(
        "Your CityPulse withdrawal of {} was not approved: {reason}. The funds are back in your wallet.",
        format_kes(amount_cents)
    )
}

/// `KES 1,234.50` from integer cents.
pub fn format_kes(amount_cents: i64) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    let whole = (abs / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, ch) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}KES {grouped}.{:02}", abs % 100)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records every message; optionally fails every send.
    #[derive(Default)]
    pub struct RecordingSms {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl RecordingSms {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        /// Six-digit code from the most recent OTP message to `phone`.
        pub fn last_code_for(&self, phone: &str) -> Option<String> {
            self.messages()
                .into_iter()
                .rev()
                .find(|(to, _)| to == phone)
                .and_then(|(_, body)| {
                    body.split(|c: char| !c.is_ascii_digit())
                        .find(|chunk| chunk.len() == 6)
                        .map(str::to_string)
                })
        }
    }

    #[async_trait]
    impl SmsSender for RecordingSms {
        fn provider(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, to: &Msisdn, body: &str) -> Result<SmsReceipt, SmsError> {
            if self.fail {
                return Err(SmsError::Request("provider unreachable".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((to.to_string(), body.to_string()));
            Ok(SmsReceipt {
                provider: "recording",
                message_id: format!("SM{}", sent.len()),
            })
        }
    }
}
