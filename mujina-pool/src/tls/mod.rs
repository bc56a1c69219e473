//! TLS for pool connections and for accepting miners.
//!
//! Sessions are sans-io: they never touch a socket. The connection task
//! feeds them ciphertext and writes out whatever they produce, which keeps
//! the handshake logic testable without a network.
//!
//! Client sessions verify the pool by certificate chain, by a pinned SHA-256
//! fingerprint of the leaf certificate, or not at all. A failed check aborts
//! the handshake; there is no fallback to plaintext.

mod config;
mod detect;
mod error;
mod session;
mod verify;

pub use config::{
    client_config, server_config_from_pem, PeerVerification, TlsConfig, TlsProtocols,
};
pub use detect::DetectingSession;
pub use error::TlsError;
pub use session::{TlsInfo, TlsSession};
pub use verify::{fingerprint, normalize_fingerprint};

#[cfg(test)]
pub(crate) use session::tests::test_cert;
