use std::io::{Read, Write};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{
    ClientConfig, ClientConnection, Connection, ProtocolVersion, ServerConfig, ServerConnection,
};

use super::verify::fingerprint;
use super::TlsError;
use crate::tracing::prelude::*;

/// What was negotiated, reported once the handshake completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub version: String,
    /// SHA-256 of the peer's leaf certificate, if it presented one.
    pub fingerprint: Option<String>,
}

/// Sans-io TLS session.
///
/// The owner moves bytes between the socket and the session: ciphertext
/// read from the socket goes into [`feed`](Self::feed), which returns any
/// decrypted plaintext, and [`take_outgoing`](Self::take_outgoing) yields
/// what must be written back. Application data passed to
/// [`send`](Self::send) before the handshake completes is buffered and
/// flushed once it does.
pub struct TlsSession {
    conn: Connection,
    ready: bool,
    closed: bool,
    info: Option<TlsInfo>,
}

impl TlsSession {
    pub fn client(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TlsError> {
        let name = ServerName::try_from(server_name.to_string()).map_err(|e| {
            TlsError::Config(format!("invalid server name {:?}: {}", server_name, e))
        })?;
        let conn = ClientConnection::new(config, name)?;
        Ok(Self::new(conn.into()))
    }

    pub fn server(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self::new(conn.into()))
    }

    fn new(conn: Connection) -> Self {
        Self {
            conn,
            ready: false,
            closed: false,
            info: None,
        }
    }

    /// Process ciphertext from the peer, appending decrypted application
    /// data to `plaintext`.
    pub fn feed(&mut self, mut data: &[u8], plaintext: &mut Vec<u8>) -> Result<(), TlsError> {
        while !data.is_empty() {
            if self.conn.read_tls(&mut data)? == 0 {
                break;
            }

            let state = self.conn.process_new_packets().map_err(|e| {
                self.closed = true;
                TlsError::from(e)
            })?;

            let pending = state.plaintext_bytes_to_read();
            if pending > 0 {
                let start = plaintext.len();
                plaintext.resize(start + pending, 0);
                self.conn.reader().read_exact(&mut plaintext[start..])?;
            }

            if state.peer_has_closed() {
                self.closed = true;
            }
        }

        if !self.ready && !self.conn.is_handshaking() {
            self.ready = true;
            let info = self.negotiated();
            debug!(version = %info.version, "TLS handshake complete");
            self.info = Some(info);
        }

        Ok(())
    }

    /// Ciphertext waiting to go out on the wire.
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut out) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "TLS write failed");
                    break;
                }
            }
        }
        out
    }

    /// Encrypt application data.
    pub fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
        if self.closed {
            return Err(TlsError::NotWritable);
        }
        self.conn.writer().write_all(data)?;
        Ok(())
    }

    /// Handshake completed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue a close_notify alert.
    pub fn close(&mut self) {
        if !self.closed {
            self.conn.send_close_notify();
            self.closed = true;
        }
    }

    pub fn info(&self) -> Option<&TlsInfo> {
        self.info.as_ref()
    }

    fn negotiated(&self) -> TlsInfo {
        let version = match self.conn.protocol_version() {
            Some(ProtocolVersion::TLSv1_3) => "TLSv1.3".to_string(),
            Some(ProtocolVersion::TLSv1_2) => "TLSv1.2".to_string(),
            Some(other) => format!("{:?}", other),
            None => "unknown".to_string(),
        };
        let fingerprint = self
            .conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(fingerprint);

        TlsInfo {
            version,
            fingerprint,
        }
    }
}
