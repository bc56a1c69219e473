//! TLS settings and construction of rustls configurations from them.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitflags::bitflags;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};

use super::verify::{normalize_fingerprint, PinnedVerifier};
use super::TlsError;
use crate::tracing::prelude::*;

bitflags! {
    /// TLS protocol versions a session may negotiate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TlsProtocols: u8 {
        const TLS_1_2 = 1 << 0;
        const TLS_1_3 = 1 << 1;
    }
}

impl TlsProtocols {
    /// Parse a space-separated list such as `"TLSv1.2 TLSv1.3"`.
    ///
    /// Versions older than 1.2 are not supported and are skipped with a
    /// warning. An empty result means "all supported versions".
    pub fn parse(list: &str) -> Self {
        let mut protocols = TlsProtocols::empty();
        for name in list.split_whitespace() {
            match name {
                "TLSv1.2" => protocols |= TlsProtocols::TLS_1_2,
                "TLSv1.3" => protocols |= TlsProtocols::TLS_1_3,
                "TLSv1" | "TLSv1.1" => warn!(protocol = name, "Obsolete TLS protocol ignored"),
                other => warn!(protocol = other, "Unknown TLS protocol ignored"),
            }
        }
        protocols
    }

    fn versions(self) -> Vec<&'static SupportedProtocolVersion> {
        let mut versions = Vec::new();
        if self.is_empty() || self.contains(TlsProtocols::TLS_1_3) {
            versions.push(&rustls::version::TLS13);
        }
        if self.is_empty() || self.contains(TlsProtocols::TLS_1_2) {
            versions.push(&rustls::version::TLS12);
        }
        versions
    }
}

impl Default for TlsProtocols {
    fn default() -> Self {
        TlsProtocols::all()
    }
}

/// How the client side checks the server it connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerVerification {
    /// Standard certificate chain validation against the webpki roots.
    Chain,
    /// Accept only a leaf certificate with this SHA-256 fingerprint.
    Fingerprint(String),
    /// Accept any certificate.
    Insecure,
}

impl PeerVerification {
    /// Verification for a pool: pinned when a fingerprint is configured,
    /// otherwise anything goes, as mining pools commonly use self-signed
    /// certificates.
    pub fn for_pool(fingerprint: Option<&str>) -> Self {
        match fingerprint {
            Some(fp) if !fp.is_empty() => PeerVerification::Fingerprint(normalize_fingerprint(fp)),
            _ => PeerVerification::Insecure,
        }
    }
}

/// TLS settings for the server role (and protocol limits for both roles).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Space separated list of protocol names, e.g. `"TLSv1.2 TLSv1.3"`
    #[serde(default)]
    pub protocols: Option<String>,

    /// PEM certificate chain
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// PEM private key
    #[serde(default)]
    pub cert_key: Option<PathBuf>,
}

impl TlsConfig {
    pub fn protocols(&self) -> TlsProtocols {
        self.protocols
            .as_deref()
            .map(TlsProtocols::parse)
            .unwrap_or_default()
    }

    /// Build the server-side rustls configuration from the certificate and
    /// key files.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, TlsError> {
        let (Some(cert), Some(key)) = (&self.cert, &self.cert_key) else {
            return Err(TlsError::Config(
                "certificate and key paths are required".to_string(),
            ));
        };

        let cert_pem = read_pem(cert)?;
        let key_pem = read_pem(key)?;
        server_config_from_pem(&cert_pem, &key_pem, self.protocols())
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path)
        .map_err(|e| TlsError::Config(format!("failed to read {}: {}", path.display(), e)))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client-side configuration for connecting to a pool.
pub fn client_config(
    verification: &PeerVerification,
    protocols: TlsProtocols,
) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&protocols.versions())
        .map_err(|e| TlsError::Config(e.to_string()))?;

    let config = match verification {
        PeerVerification::Chain => {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        PeerVerification::Fingerprint(fp) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedVerifier::new(
                Some(normalize_fingerprint(fp)),
                provider,
            )))
            .with_no_client_auth(),
        PeerVerification::Insecure => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedVerifier::new(None, provider)))
            .with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Server-side configuration from PEM-encoded certificate chain and key.
pub fn server_config_from_pem(
    cert_pem: &[u8],
    key_pem: &[u8],
    protocols: TlsProtocols,
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::Config(format!("bad certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(TlsError::Config("no certificate found".to_string()));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| TlsError::Config(format!("bad private key: {}", e)))?
        .ok_or_else(|| TlsError::Config("no private key found".to_string()))?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&protocols.versions())
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(e.to_string()))?;

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_list() {
        assert_eq!(
            TlsProtocols::parse("TLSv1.2 TLSv1.3"),
            TlsProtocols::TLS_1_2 | TlsProtocols::TLS_1_3
        );
        assert_eq!(TlsProtocols::parse("TLSv1 TLSv1.2"), TlsProtocols::TLS_1_2);
        assert!(TlsProtocols::parse("").is_empty());
        assert_eq!(TlsProtocols::TLS_1_3.versions().len(), 1);
        assert_eq!(TlsProtocols::empty().versions().len(), 2);
    }

    #[test]
    fn test_pool_verification_choice() {
        assert_eq!(PeerVerification::for_pool(None), PeerVerification::Insecure);
        assert_eq!(
            PeerVerification::for_pool(Some("AB:CD")),
            PeerVerification::Fingerprint("abcd".to_string())
        );
    }

    #[test]
    fn test_server_config_requires_paths() {
        let config = TlsConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(matches!(config.server_config(), Err(TlsError::Config(_))));
    }

    #[test]
    fn test_server_config_rejects_garbage_pem() {
        let result = server_config_from_pem(b"not a pem", b"nope", TlsProtocols::all());
        assert!(matches!(result, Err(TlsError::Config(_))));
    }
}
