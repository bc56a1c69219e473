use std::sync::Arc;

use rustls::ServerConfig;

use super::{TlsError, TlsInfo, TlsSession};
use crate::tracing::prelude::*;

/// Record header of a TLS 1.x ClientHello: handshake, version 3.1.
const CLIENT_HELLO_PREFIX: [u8; 3] = [0x16, 0x03, 0x01];

enum Mode {
    Undecided,
    Tls(Box<TlsSession>),
    Plain { outgoing: Vec<u8> },
}

/// Server-side session that accepts both TLS and plaintext clients on one
/// port.
///
/// The first bytes received decide the mode for the life of the session:
/// a TLS ClientHello header selects TLS, anything else plaintext. Plaintext
/// mode passes data through untouched in both directions.
pub struct DetectingSession {
    config: Arc<ServerConfig>,
    mode: Mode,
}

impl DetectingSession {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            mode: Mode::Undecided,
        }
    }

    pub fn feed(&mut self, data: &[u8], plaintext: &mut Vec<u8>) -> Result<(), TlsError> {
        if data.is_empty() {
            return Ok(());
        }

        if let Mode::Undecided = self.mode {
            let n = data.len().min(CLIENT_HELLO_PREFIX.len());
            self.mode = if data[..n] == CLIENT_HELLO_PREFIX[..n] {
                debug!("Incoming connection speaks TLS");
                Mode::Tls(Box::new(TlsSession::server(self.config.clone())?))
            } else {
                debug!("Incoming connection is plaintext");
                Mode::Plain {
                    outgoing: Vec::new(),
                }
            };
        }

        match &mut self.mode {
            Mode::Tls(session) => session.feed(data, plaintext),
            Mode::Plain { .. } => {
                plaintext.extend_from_slice(data);
                Ok(())
            }
            Mode::Undecided => Ok(()),
        }
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), TlsError> {
        match &mut self.mode {
            Mode::Tls(session) => session.send(data),
            Mode::Plain { outgoing } => {
                outgoing.extend_from_slice(data);
                Ok(())
            }
            Mode::Undecided => Err(TlsError::NotWritable),
        }
    }

    pub fn take_outgoing(&mut self) -> Vec<u8> {
        match &mut self.mode {
            Mode::Tls(session) => session.take_outgoing(),
            Mode::Plain { outgoing } => std::mem::take(outgoing),
            Mode::Undecided => Vec::new(),
        }
    }

    /// `None` until the first bytes arrive.
    pub fn is_tls(&self) -> Option<bool> {
        match self.mode {
            Mode::Undecided => None,
            Mode::Tls(_) => Some(true),
            Mode::Plain { .. } => Some(false),
        }
    }

    pub fn info(&self) -> Option<&TlsInfo> {
        match &self.mode {
            Mode::Tls(session) => session.info(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::session::tests::test_cert;
    use super::super::{client_config, PeerVerification, TlsProtocols};
    use super::*;

    #[test]
    fn test_plaintext_detected_and_permanent() {
        let cert = test_cert();
        let mut session = DetectingSession::new(cert.server_config);
        assert_eq!(session.is_tls(), None);

        let mut plain = Vec::new();
        session.feed(b"GET / HTTP/1.1\r\n", &mut plain).unwrap();
        assert_eq!(session.is_tls(), Some(false));
        assert_eq!(plain, b"GET / HTTP/1.1\r\n");

        // a later ClientHello does not switch modes
        session.feed(&[0x16, 0x03, 0x01, 0x00], &mut plain).unwrap();
        assert_eq!(session.is_tls(), Some(false));

        session.send(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(session.take_outgoing(), b"HTTP/1.1 200 OK\r\n");
        assert!(session.take_outgoing().is_empty());
    }

    #[test]
    fn test_partial_prefix_selects_tls() {
        let cert = test_cert();
        let mut session = DetectingSession::new(cert.server_config);
        let mut plain = Vec::new();
        session.feed(&[0x16], &mut plain).unwrap();
        assert_eq!(session.is_tls(), Some(true));
    }

    #[test]
    fn test_tls_client_detected() {
        let cert = test_cert();
        let mut server = DetectingSession::new(cert.server_config);
        let config = client_config(&PeerVerification::Insecure, TlsProtocols::all()).unwrap();
        let mut client = TlsSession::client(config, "localhost").unwrap();

        client.send(b"hello\n").unwrap();
        let mut at_server = Vec::new();
        let mut at_client = Vec::new();
        for _ in 0..16 {
            let to_server = client.take_outgoing();
            let to_client = server.take_outgoing();
            if to_server.is_empty() && to_client.is_empty() {
                break;
            }
            server.feed(&to_server, &mut at_server).unwrap();
            client.feed(&to_client, &mut at_client).unwrap();
        }

        assert_eq!(server.is_tls(), Some(true));
        assert_eq!(at_server, b"hello\n");
        assert!(server.info().is_some());
    }

    #[test]
    fn test_undecided_cannot_send() {
        let cert = test_cert();
        let mut session = DetectingSession::new(cert.server_config);
        assert!(matches!(session.send(b"x"), Err(TlsError::NotWritable)));
        session.feed(&[], &mut Vec::new()).unwrap();
        assert_eq!(session.is_tls(), None);
    }
}
