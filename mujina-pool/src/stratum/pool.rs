//! What the client needs to know about one pool.

use std::str::FromStr;

use super::dialect::ProtocolMode;
use super::error::{StratumError, StratumResult};
use super::url::{PoolUrl, ProxyUrl};
use crate::config::PoolConfig;
use crate::job::Algorithm;
use crate::tls::PeerVerification;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub url: PoolUrl,
    pub user: String,
    pub password: String,
    pub rig_id: Option<String>,
    /// Algorithm offered at login; jobs may still name another.
    pub algorithm: Option<Algorithm>,
    pub mode: ProtocolMode,
    /// Expected SHA-256 of the pool's TLS certificate.
    pub fingerprint: Option<String>,
    pub proxy: Option<ProxyUrl>,
    pub keepalive: bool,
    pub nicehash: bool,
}

impl Pool {
    pub fn new(url: PoolUrl, user: impl Into<String>) -> Self {
        Self {
            url,
            user: user.into(),
            password: "x".to_string(),
            rig_id: None,
            algorithm: None,
            mode: ProtocolMode::Default,
            fingerprint: None,
            proxy: None,
            keepalive: false,
            nicehash: false,
        }
    }

    pub fn from_config(config: &PoolConfig) -> StratumResult<Self> {
        let url = PoolUrl::from_str(&config.url)?;
        let algorithm = config
            .algo
            .as_deref()
            .map(|name| {
                name.parse::<Algorithm>()
                    .map_err(|_| StratumError::InvalidUrl(format!("unknown algorithm {:?}", name)))
            })
            .transpose()?;
        let proxy = config.proxy.as_deref().map(ProxyUrl::from_str).transpose()?;

        // KawPow pools only speak the Eth dialect
        let mode = match (config.mode, algorithm) {
            (ProtocolMode::Default, Some(algo)) if algo.uses_eth_dialect() => ProtocolMode::Eth,
            (mode, _) => mode,
        };

        Ok(Self {
            url,
            user: config.user.clone(),
            password: config.pass.clone(),
            rig_id: config.rig_id.clone(),
            algorithm,
            mode,
            fingerprint: config.fingerprint.clone(),
            proxy,
            keepalive: config.keepalive,
            nicehash: config.nicehash,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.url.tls
    }

    pub fn verification(&self) -> PeerVerification {
        PeerVerification::for_pool(self.fingerprint.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = PoolConfig {
            url: "stratum+ssl://pool.example.com:443".to_string(),
            user: "wallet".to_string(),
            pass: "x".to_string(),
            algo: Some("rx/0".to_string()),
            proxy: Some("9050".to_string()),
            ..Default::default()
        };
        let pool = Pool::from_config(&config).unwrap();
        assert!(pool.is_tls());
        assert_eq!(pool.algorithm, Some(Algorithm::Rx0));
        assert_eq!(pool.proxy.unwrap().port, 9050);
        assert_eq!(pool.mode, ProtocolMode::Default);
    }

    #[test]
    fn test_kawpow_selects_eth() {
        let config = PoolConfig {
            url: "rvn.example.com:4444".to_string(),
            algo: Some("kawpow".to_string()),
            ..Default::default()
        };
        assert_eq!(Pool::from_config(&config).unwrap().mode, ProtocolMode::Eth);
    }

    #[test]
    fn test_unknown_algorithm() {
        let config = PoolConfig {
            url: "pool.example.com".to_string(),
            algo: Some("sha256d".to_string()),
            ..Default::default()
        };
        assert!(Pool::from_config(&config).is_err());
    }
}
