// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Instant;

use crate::auth::TokenIssuer;
use crate::cache::CacheStore;
use crate::config::AppConfig;
use crate::crypto::{CryptoError, FieldCipher};
use crate::otp::OtpService;
use crate::sms::SmsSender;
use crate::storage::Store;

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
    pub cache: Arc<dyn CacheStore>,
    pub sms: Arc<dyn SmsSender>,
    pub tokens: Arc<TokenIssuer>,
    pub cipher: Arc<FieldCipher>,
    pub otp: Arc<OtpService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Store,
        cache: Arc<dyn CacheStore>,
        sms: Arc<dyn SmsSender>,
    ) -> Result<Self, CryptoError> {
        let cipher = FieldCipher::new(&config.encryption_key)?;
        let otp = OtpService::new(
            cache.clone(),
            sms.clone(),
            config.otp.clone(),
            config.environment.is_development(),
        );
        Ok(Self {
            tokens: Arc::new(TokenIssuer::new(&config.jwt)),
            cipher: Arc::new(cipher),
            otp: Arc::new(otp),
            config: Arc::new(config),
            store: Arc::new(store),
            cache,
            sms,
            started_at: Instant::now(),
        })
    }

    /// Phone rendering for logs: full in development, masked elsewhere.
    pub fn log_phone(&self, phone: &crate::otp::Msisdn) -> String {
        if self.config.environment.is_development() {
            phone.to_string()
        } else {
            phone.masked()
        }
    }
}
