// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Twilio Programmable Messaging.
//!
//! `POST {base}/2010-04-01/Accounts/{sid}/Messages.json` with a form body
//! (`To`, `From`, `Body`) and HTTP basic auth (`sid:auth_token`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{SmsError, SmsReceipt, SmsSender};
use crate::config::TwilioConfig;
use crate::otp::phone::Msisdn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

pub struct TwilioSms {
    config: TwilioConfig,
    http: Client,
}

impl TwilioSms {
    pub fn new(config: TwilioConfig) -> Result<Self, SmsError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SmsError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn messages_url(&self) -> Result<Url, SmsError> {
        self.config
            .base_url
            .join(&format!(
                "2010-04-01/Accounts/{}/Messages.json",
                self.config.account_sid
            ))
            .map_err(|e| SmsError::Request(format!("invalid Twilio URL: {e}")))
    }
}

#[async_trait]
impl SmsSender for TwilioSms {
    fn provider(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, to: &Msisdn, body: &str) -> Result<SmsReceipt, SmsError> {
        let form = [
            ("To", to.as_str()),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];

        let response = self
            .http
            .post(self.messages_url()?)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| SmsError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), to = %to.masked(), "Twilio rejected message");
            return Err(SmsError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| SmsError::InvalidResponse(e.to_string()))?;
        tracing::info!(
            sid = %message.sid,
            status = message.status.as_deref().unwrap_or("unknown"),
            to = %to.masked(),
            "SMS accepted by Twilio"
        );

        Ok(SmsReceipt {
            provider: "twilio",
            message_id: message.sid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC0123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15005550006".to_string(),
            base_url: Url::parse(base).unwrap(),
        }
    }

    #[test]
    fn messages_url_includes_account() {
        let sms = TwilioSms::new(config("https://api.twilio.com")).unwrap();
        assert_eq!(
            sms.messages_url().unwrap().as_str(),
            "https://api.twilio.com/2010-04-01/Accounts/AC0123/Messages.json"
        );
    }

    #[test]
    fn response_parses_without_status() {
        let parsed: MessageResponse = serde_json::from_str(r#"{"sid":"SM1"}"#).unwrap();
        assert_eq!(parsed.sid, "SM1");
        assert!(parsed.status.is_none());
    }

    #[tokio::test]
    async fn unreachable_provider_is_request_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let sms = TwilioSms::new(config("http://127.0.0.1:9")).unwrap();
        let phone = Msisdn::parse("+254712345678").unwrap();
        let err = sms.send(&phone, "hi").await.unwrap_err();
        assert!(matches!(err, SmsError::Request(_)));
    }
}
