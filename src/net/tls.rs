use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use tracing::info;
use wtransport::Identity;

// Written by scripts/gen-dev-cert.rs
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

/// TLS identity for the WebTransport endpoint
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64 SHA-256 of the leaf certificate, for `serverCertificateHashes`
    pub cert_hash: String,
}

/// Configured pair if both are set, else the dev pair when it exists on disk
fn resolve_pem_paths<'a>(cert_path: Option<&'a str>, key_path: Option<&'a str>) -> Option<(&'a str, &'a str)> {
    match (cert_path, key_path) {
        (Some(cert), Some(key)) => Some((cert, key)),
        _ if Path::new(DEV_CERT_FILE).is_file() && Path::new(DEV_KEY_FILE).is_file() => {
            Some((DEV_CERT_FILE, DEV_KEY_FILE))
        }
        _ => None,
    }
}

impl TlsConfig {
    pub async fn load(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Self> {
        let Some((cert, key)) = resolve_pem_paths(cert_path, key_path) else {
            bail!(
                "No TLS certificate. Set TLS_CERT_PATH and TLS_KEY_PATH, or create a dev pair with \
                 `cargo run --manifest-path scripts/Cargo.toml`"
            );
        };

        let identity = Identity::load_pemfiles(cert, key)
            .await
            .with_context(|| format!("Cannot read PEM identity {} + {}", cert, key))?;
        let cert_hash = identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|leaf| hash_der(leaf.der()))
            .unwrap_or_default();
        info!(cert, %cert_hash, "TLS identity loaded");

        Ok(Self { identity, cert_hash })
    }
}

/// Base64 SHA-256 of a DER certificate
pub fn hash_der(der: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, der).as_ref())
}
