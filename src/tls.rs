// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Optional HTTPS.
//!
//! When `TLS_CERT_PATH` and `TLS_KEY_PATH` are both set the server terminates
//! TLS itself (rustls, ring provider); otherwise it serves plain HTTP and
//! expects a proxy in front.

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsPaths;

/// Load the PEM certificate chain and private key.
pub async fn load_rustls_config(paths: &TlsPaths) -> std::io::Result<RustlsConfig> {
    let config = RustlsConfig::from_pem_file(&paths.cert_path, &paths.key_path).await?;
    tracing::info!(cert = %paths.cert_path.display(), "Loaded TLS certificate");
    Ok(config)
}
