// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Development sender: logs the message instead of delivering it.

use async_trait::async_trait;
use uuid::Uuid;

use super::{SmsError, SmsReceipt, SmsSender};
use crate::otp::phone::Msisdn;

pub struct ConsoleSms;

#[async_trait]
impl SmsSender for ConsoleSms {
    fn provider(&self) -> &'static str {
        "console"
    }

    async fn send(&self, to: &Msisdn, body: &str) -> Result<SmsReceipt, SmsError> {
        let message_id = format!("console-{}", Uuid::new_v4());
        tracing::info!(to = %to, message_id = %message_id, body = %body, "SMS (console provider)");
        Ok(SmsReceipt {
            provider: "console",
            message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_always_accepts() {
        let phone = Msisdn::parse("+254712345678").unwrap();
        let receipt = ConsoleSms.send(&phone, "hello").await.unwrap();
        assert_eq!(receipt.provider, "console");
        assert!(receipt.message_id.starts_with("console-"));
    }
}
