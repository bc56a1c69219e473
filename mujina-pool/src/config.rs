//! Configuration for mujina-pool.
//!
//! Settings are plain serde structs with defaults. The daemon fills them
//! from `MUJINA_*` environment variables; reading files is left to whoever
//! embeds the engine.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::job::Algorithm;
use crate::stratum::{AlgorithmFilter, ClientOptions, LinkOptions, ProtocolMode};
use crate::tls::TlsConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Pools in failover order, primary first
    pub pools: Vec<PoolConfig>,

    /// Failures before moving on to the next pool
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Seconds between reconnect attempts
    #[serde(default = "default_retry_pause")]
    pub retry_pause: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Algorithms the hashing side can run; empty accepts whatever the
    /// pools offer
    #[serde(default)]
    pub algorithms: Vec<String>,

    #[serde(default)]
    pub dns: DnsConfig,

    /// Address of the status listener, off when unset
    #[serde(default)]
    pub status_listen: Option<SocketAddr>,

    #[serde(default)]
    pub tls: TlsConfig,
}

/// Pool connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Pool URL (stratum+tcp://... or stratum+ssl://...)
    pub url: String,

    /// Wallet or worker name
    #[serde(default)]
    pub user: String,

    #[serde(default = "default_pass")]
    pub pass: String,

    /// Algorithm to offer at login (e.g. "rx/0")
    #[serde(default)]
    pub algo: Option<String>,

    #[serde(default)]
    pub mode: ProtocolMode,

    #[serde(default)]
    pub rig_id: Option<String>,

    /// SHA-256 fingerprint of the pool's TLS certificate
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// SOCKS5 proxy, "host:port" or just a port on localhost
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub keepalive: bool,

    /// Pool reserves the top nonce byte
    #[serde(default)]
    pub nicehash: bool,
}

/// DNS resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    /// Prefer IPv6 addresses when a host has both
    #[serde(default)]
    pub ipv6: bool,

    /// Seconds a resolved address is reused
    #[serde(default = "default_dns_ttl")]
    pub ttl: u64,
}

fn default_retries() -> u32 {
    5
}

fn default_retry_pause() -> u64 {
    5
}

fn default_user_agent() -> String {
    concat!("mujina-pool/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_pass() -> String {
    "x".to_string()
}

fn default_dns_ttl() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            retries: default_retries(),
            retry_pause: default_retry_pause(),
            user_agent: default_user_agent(),
            algorithms: Vec::new(),
            dns: DnsConfig::default(),
            status_listen: None,
            tls: TlsConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            pass: default_pass(),
            algo: None,
            mode: ProtocolMode::Default,
            rig_id: None,
            fingerprint: None,
            proxy: None,
            keepalive: false,
            nicehash: false,
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ipv6: false,
            ttl: default_dns_ttl(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from variables looked up through `var`.
    ///
    /// `MUJINA_POOL_URL` is required and may list several pools separated by
    /// commas; the per-pool settings apply to all of them.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let urls = var("MUJINA_POOL_URL")
            .ok_or_else(|| Error::Config("MUJINA_POOL_URL is not set".to_string()))?;

        let template = PoolConfig {
            url: String::new(),
            user: var("MUJINA_POOL_USER").unwrap_or_default(),
            pass: var("MUJINA_POOL_PASS").unwrap_or_else(default_pass),
            algo: var("MUJINA_POOL_ALGO"),
            mode: parse(&var, "MUJINA_POOL_MODE")?.unwrap_or_default(),
            rig_id: var("MUJINA_POOL_RIG_ID"),
            fingerprint: var("MUJINA_POOL_FINGERPRINT"),
            proxy: var("MUJINA_PROXY"),
            keepalive: flag(&var, "MUJINA_POOL_KEEPALIVE")?,
            nicehash: flag(&var, "MUJINA_POOL_NICEHASH")?,
        };

        let pools: Vec<PoolConfig> = urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| PoolConfig {
                url: url.to_string(),
                ..template.clone()
            })
            .collect();
        if pools.is_empty() {
            return Err(Error::Config("MUJINA_POOL_URL lists no pools".to_string()));
        }

        let tls = TlsConfig {
            enabled: flag(&var, "MUJINA_TLS")?,
            protocols: var("MUJINA_TLS_PROTOCOLS"),
            cert: var("MUJINA_TLS_CERT").map(PathBuf::from),
            cert_key: var("MUJINA_TLS_CERT_KEY").map(PathBuf::from),
        };
        let algorithms = var("MUJINA_ALGORITHMS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            pools,
            retries: parse(&var, "MUJINA_RETRIES")?.unwrap_or_else(default_retries),
            retry_pause: parse(&var, "MUJINA_RETRY_PAUSE")?.unwrap_or_else(default_retry_pause),
            user_agent: var("MUJINA_USER_AGENT").unwrap_or_else(default_user_agent),
            algorithms,
            dns: DnsConfig {
                ipv6: flag(&var, "MUJINA_DNS_IPV6")?,
                ttl: parse(&var, "MUJINA_DNS_TTL")?.unwrap_or_else(default_dns_ttl),
            },
            status_listen: parse(&var, "MUJINA_STATUS_LISTEN")?,
            tls,
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            retries: self.retries,
            retry_pause: Duration::from_secs(self.retry_pause),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Client hooks restricting pools to [`Config::algorithms`], if any
    /// are listed.
    pub fn algorithm_filter(&self) -> Result<Option<AlgorithmFilter>> {
        if self.algorithms.is_empty() {
            return Ok(None);
        }
        let algorithms = self
            .algorithms
            .iter()
            .map(|name| {
                name.parse::<Algorithm>()
                    .map_err(|_| Error::Config(format!("unknown algorithm {:?}", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(AlgorithmFilter::new(algorithms)))
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            dns_ipv6: self.dns.ipv6,
            dns_ttl: Duration::from_secs(self.dns.ttl),
            tls_protocols: self.tls.protocols(),
        }
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e)))
        })
        .transpose()
}

fn flag(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool> {
    match var(name).as_deref().map(str::trim) {
        None | Some("") | Some("0") | Some("false") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("yes") => Ok(true),
        Some(other) => Err(Error::Config(format!(
            "{}={:?}: expected a boolean",
            name, other
        ))),
    }
}
