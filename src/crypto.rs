// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cryptographic helpers.
//!
//! - Keyed digests (HMAC-SHA256) for OTP codes and refresh tokens, so the
//!   stored value is useless without the server secret.
//! - Numeric OTP generation from the OS CSPRNG.
//! - AES-256-GCM sealing for sensitive fields at rest (payout destinations).

use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random number generator failure")]
    Rng,
    #[error("invalid key material")]
    InvalidKey,
    #[error("ciphertext is malformed or was tampered with")]
    Decrypt,
}

/// HMAC-SHA256 of `message` under `secret`, base64 encoded.
pub fn keyed_digest(secret: &[u8], message: &str) -> Result<String, CryptoError> {
    Ok(Base64::encode_string(&mac(secret, message)?.finalize().into_bytes()))
}

/// Constant-time check of a digest produced by [`keyed_digest`].
pub fn verify_keyed_digest(secret: &[u8], message: &str, expected: &str) -> bool {
    let (Ok(expected), Ok(mac)) = (Base64::decode_vec(expected), mac(secret, message)) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

fn mac(secret: &[u8], message: &str) -> Result<HmacSha256, CryptoError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| CryptoError::InvalidKey)?;
    mac.update(message.as_bytes());
    Ok(mac)
}

/// Uniformly distributed numeric code with `digits` digits (1..=9).
pub fn numeric_code(rng: &SystemRandom, digits: u32) -> Result<String, CryptoError> {
    let digits = digits.clamp(1, 9);
    let modulus = 10u32.pow(digits);
    // Largest multiple of `modulus` that fits in u32; values above it are
    // rejected to avoid modulo bias.
    let limit = u32::MAX - (u32::MAX % modulus);
    loop {
        let mut buf = [0u8; 4];
        rng.fill(&mut buf).map_err(|_| CryptoError::Rng)?;
        let value = u32::from_be_bytes(buf);
        if value < limit {
            return Ok(format!("{:0width$}", value % modulus, width = digits as usize));
        }
    }
}

/// Opaque random identifier (URL-safe base64 of `bytes` random bytes).
pub fn random_token(rng: &SystemRandom, bytes: usize) -> Result<String, CryptoError> {
    let mut buf = vec![0u8; bytes];
    rng.fill(&mut buf).map_err(|_| CryptoError::Rng)?;
    Ok(Base64UrlUnpadded::encode_string(&buf))
}

/// AES-256-GCM field cipher. Output is `base64(nonce || ciphertext || tag)`.
pub struct FieldCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl FieldCipher {
    pub fn new(key_bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let unbound =
            UnboundKey::new(&aead::AES_256_GCM, key_bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Seal `plaintext`, binding it to `context` (e.g. the owning record id).
    pub fn seal(&self, plaintext: &str, context: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| CryptoError::Rng)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(context.as_bytes()), &mut in_out)
            .map_err(|_| CryptoError::InvalidKey)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(Base64::encode_string(&out))
    }

    pub fn open(&self, sealed: &str, context: &str) -> Result<String, CryptoError> {
        let raw = Base64::decode_vec(sealed).map_err(|_| CryptoError::Decrypt)?;
        if raw.len() < NONCE_LEN + aead::AES_256_GCM.tag_len() {
            return Err(CryptoError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Decrypt)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(context.as_bytes()), &mut in_out)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Decrypt)
    }
}
