use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer certificate failed chain validation or did not match the
    /// pinned fingerprint
    #[error("certificate verification failed: {0}")]
    CertificateVerificationFailed(String),

    #[error("TLS session is not writable")]
    NotWritable,

    #[error("TLS configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        match err {
            rustls::Error::InvalidCertificate(_) => {
                TlsError::CertificateVerificationFailed(err.to_string())
            }
            other => TlsError::HandshakeFailed(other.to_string()),
        }
    }
}
