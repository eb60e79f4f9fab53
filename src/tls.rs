//! mTLS server configuration for the RPC listener.
//!
//! Client certificate verification is mandatory whenever `[server]
//! ca_certificate` is configured; otherwise the listener falls back to
//! server-only TLS (still required — plaintext RPC is never offered).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

use crate::config::ServerConfig;
use crate::error::ConfigError;

fn read_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })
}

fn read_private_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| ConfigError::InvalidValue {
            section: "server".to_string(),
            key: "key".to_string(),
            reason: "no private key found in PEM file".to_string(),
        })
}

/// Build the listener's TLS configuration. When `ca_certificate` is set,
/// client certificates are required and verified against it (mTLS); the RPC
/// handlers themselves never inspect the peer certificate, authenticating
/// purely via the per-method bearer tokens — client cert verification is a
/// transport-layer gate, not an identity source.
pub async fn build_rustls_config(config: &ServerConfig) -> Result<RustlsConfig, ConfigError> {
    let certs = read_certs(&config.certificate)?;
    let key = read_private_key(&config.key)?;

    let tls_config = match &config.ca_certificate {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in read_certs(ca_path)? {
                roots.add(cert).map_err(|e| ConfigError::InvalidValue {
                    section: "server".to_string(),
                    key: "ca_certificate".to_string(),
                    reason: e.to_string(),
                })?;
            }
            let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| ConfigError::InvalidValue {
                    section: "server".to_string(),
                    key: "ca_certificate".to_string(),
                    reason: e.to_string(),
                })?;
            rustls::ServerConfig::builder()
                .with_client_cert_verifier(client_verifier)
                .with_single_cert(certs, key)
        }
        None => rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key),
    }
    .map_err(|e| ConfigError::InvalidValue {
        section: "server".to_string(),
        key: "certificate".to_string(),
        reason: e.to_string(),
    })?;

    Ok(RustlsConfig::from_config(Arc::new(tls_config)))
}
