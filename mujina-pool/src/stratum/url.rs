//! Pool and proxy addresses.

use std::fmt;
use std::str::FromStr;

use super::error::StratumError;

/// Port used when a pool URL doesn't name one.
pub const DEFAULT_PORT: u16 = 3333;

const LOCALHOST: &str = "127.0.0.1";

/// Address of a stratum pool.
///
/// Accepted forms:
///
/// - `stratum+tcp://host:port`, `tcp://host:port`
/// - `stratum+ssl://host:port`, `stratum+tls://host:port`, `ssl://`, `tls://`
/// - `host:port` and `host` (plain TCP, default port 3333)
/// - `[2001:db8::1]:port` for IPv6 literals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUrl {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl PoolUrl {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

impl FromStr for PoolUrl {
    type Err = StratumError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let url = url.trim();
        let (tls, rest) = match url.split_once("://") {
            Some((scheme, rest)) => {
                let tls = match scheme.to_ascii_lowercase().as_str() {
                    "stratum+tcp" | "tcp" => false,
                    "stratum+ssl" | "stratum+tls" | "ssl" | "tls" => true,
                    other => {
                        return Err(StratumError::InvalidUrl(format!(
                            "unsupported scheme {:?}",
                            other
                        )))
                    }
                };
                (tls, rest)
            }
            None => (false, url),
        };

        let rest = rest.trim_end_matches('/');
        let (host, port) = split_host_port(rest)?;
        let port = port.unwrap_or(DEFAULT_PORT);

        Ok(Self::new(host, port, tls))
    }
}

impl fmt::Display for PoolUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "stratum+ssl" } else { "stratum+tcp" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// SOCKS5 proxy address: `host:port`, or just a port on localhost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    pub host: String,
    pub port: u16,
}

impl FromStr for ProxyUrl {
    type Err = StratumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("socks5://").unwrap_or(s);

        if let Ok(port) = s.parse::<u16>() {
            return valid_proxy(LOCALHOST.to_string(), port);
        }

        let (host, port) = split_host_port(s)?;
        let port =
            port.ok_or_else(|| StratumError::InvalidUrl(format!("proxy {:?} has no port", s)))?;
        valid_proxy(host, port)
    }
}

fn valid_proxy(host: String, port: u16) -> Result<ProxyUrl, StratumError> {
    if port == 0 {
        return Err(StratumError::InvalidUrl("proxy port 0".to_string()));
    }
    Ok(ProxyUrl { host, port })
}

impl fmt::Display for ProxyUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn split_host_port(s: &str) -> Result<(String, Option<u16>), StratumError> {
    let invalid = || StratumError::InvalidUrl(s.to_string());

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        match after {
            "" => (host, None),
            _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match s.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (s, None),
        }
    };

    if host.is_empty() || host.contains('/') {
        return Err(invalid());
    }

    let port = match port {
        Some(p) => {
            let port = p.parse::<u16>().map_err(|_| invalid())?;
            if port == 0 {
                return Err(invalid());
            }
            Some(port)
        }
        None => None,
    };

    Ok((host.to_string(), port))
}
