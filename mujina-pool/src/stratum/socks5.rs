//! SOCKS5 client handshake (RFC 1928, no authentication).
//!
//! Sans-io: [`Socks5::start`] yields the greeting to write, and each chunk
//! read from the proxy goes through [`Socks5::read`], which says what to
//! write next. Once [`Socks5::is_ready`] the stream carries pool traffic and
//! any bytes the proxy sent past its reply are handed back.

use std::net::IpAddr;

use super::error::StratumError;

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    SentInitialHandshake,
    SentFinalHandshake,
    Ready,
}

/// Outcome of feeding proxy bytes to the handshake.
#[derive(Debug, PartialEq, Eq)]
pub enum Socks5Step {
    /// Need more bytes from the proxy.
    Pending,
    /// Write these bytes to the proxy.
    Send(Vec<u8>),
    /// Tunnel established; the bytes are early pool data, possibly empty.
    Ready(Vec<u8>),
}

#[derive(Debug)]
pub struct Socks5 {
    host: String,
    port: u16,
    state: State,
    buf: Vec<u8>,
}

impl Socks5 {
    /// Handshake that asks the proxy to connect to `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            state: State::Created,
            buf: Vec::new(),
        }
    }

    /// The greeting offering the no-authentication method.
    pub fn start(&mut self) -> Vec<u8> {
        self.state = State::SentInitialHandshake;
        vec![VERSION, 1, NO_AUTH]
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    pub fn read(&mut self, data: &[u8]) -> Result<Socks5Step, StratumError> {
        self.buf.extend_from_slice(data);

        match self.state {
            State::Created | State::Ready => Err(StratumError::Protocol(
                "unexpected SOCKS5 data".to_string(),
            )),
            State::SentInitialHandshake => {
                if self.buf.len() < 2 {
                    return Ok(Socks5Step::Pending);
                }
                if self.buf[0] != VERSION || self.buf[1] != NO_AUTH {
                    return Err(StratumError::Transport(format!(
                        "SOCKS5 proxy refused method: {:02x?}",
                        &self.buf[..2]
                    )));
                }
                self.buf.drain(..2);
                self.state = State::SentFinalHandshake;
                Ok(Socks5Step::Send(self.connect_request()?))
            }
            State::SentFinalHandshake => {
                if self.buf.len() < 5 {
                    return Ok(Socks5Step::Pending);
                }
                if self.buf[0] != VERSION {
                    return Err(StratumError::Transport("bad SOCKS5 reply".to_string()));
                }
                if self.buf[1] != 0 {
                    return Err(StratumError::Transport(format!(
                        "SOCKS5 connect failed with code {}",
                        self.buf[1]
                    )));
                }

                // header 4 + address + port 2
                let size = match self.buf[3] {
                    ATYP_IPV4 => 4 + 4 + 2,
                    ATYP_IPV6 => 4 + 16 + 2,
                    ATYP_DOMAIN => 4 + 1 + usize::from(self.buf[4]) + 2,
                    other => {
                        return Err(StratumError::Transport(format!(
                            "SOCKS5 reply has unknown address type {}",
                            other
                        )))
                    }
                };
                if self.buf.len() < size {
                    return Ok(Socks5Step::Pending);
                }

                let early = self.buf.split_off(size);
                self.buf.clear();
                self.state = State::Ready;
                Ok(Socks5Step::Ready(early))
            }
        }
    }

    fn connect_request(&self) -> Result<Vec<u8>, StratumError> {
        let mut req = vec![VERSION, CMD_CONNECT, 0x00];

        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => {
                req.push(ATYP_IPV4);
                req.extend_from_slice(&ip.octets());
            }
            Ok(IpAddr::V6(ip)) => {
                req.push(ATYP_IPV6);
                req.extend_from_slice(&ip.octets());
            }
            Err(_) => {
                let name = self.host.as_bytes();
                let len = u8::try_from(name.len()).map_err(|_| {
                    StratumError::InvalidUrl(format!("hostname too long for SOCKS5: {}", self.host))
                })?;
                req.push(ATYP_DOMAIN);
                req.push(len);
                req.extend_from_slice(name);
            }
        }

        req.extend_from_slice(&self.port.to_be_bytes());
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_handshake() {
        let mut socks = Socks5::new("pool.example.com", 3333);
        assert_eq!(socks.start(), vec![5, 1, 0]);
        assert_eq!(socks.read(&[5]).unwrap(), Socks5Step::Pending);

        let Socks5Step::Send(req) = socks.read(&[0]).unwrap() else {
            panic!("expected connect request");
        };
        let mut expected = vec![5, 1, 0, 3, 16];
        expected.extend_from_slice(b"pool.example.com");
        expected.extend_from_slice(&[0x0d, 0x05]);
        assert_eq!(req, expected);

        assert_eq!(socks.read(&[5, 0, 0, 1, 10]).unwrap(), Socks5Step::Pending);
        let step = socks.read(&[0, 0, 1, 0x1f, 0x90, b'{']).unwrap();
        assert_eq!(step, Socks5Step::Ready(vec![b'{']));
        assert!(socks.is_ready());
    }

    #[test]
    fn test_ip_literals() {
        let mut socks = Socks5::new("192.0.2.7", 80);
        socks.start();
        let Socks5Step::Send(req) = socks.read(&[5, 0]).unwrap() else {
            panic!("expected connect request");
        };
        assert_eq!(req, vec![5, 1, 0, 1, 192, 0, 2, 7, 0, 80]);

        let mut socks = Socks5::new("::1", 80);
        socks.start();
        let Socks5Step::Send(req) = socks.read(&[5, 0]).unwrap() else {
            panic!("expected connect request");
        };
        assert_eq!(req.len(), 4 + 16 + 2);
        assert_eq!(req[3], 4);

        let mut reply = vec![5, 0, 0, 4];
        reply.extend_from_slice(&[0; 18]);
        assert_eq!(socks.read(&reply).unwrap(), Socks5Step::Ready(vec![]));
    }

    #[test]
    fn test_refusals() {
        let mut socks = Socks5::new("pool", 1);
        socks.start();
        assert!(socks.read(&[5, 0xff]).is_err());

        let mut socks = Socks5::new("pool", 1);
        socks.start();
        socks.read(&[5, 0]).unwrap();
        assert!(matches!(
            socks.read(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]),
            Err(StratumError::Transport(_))
        ));
    }
}
