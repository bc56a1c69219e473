use std::net::IpAddr;

use async_trait::async_trait;

use super::DnsError;

/// Name lookup backend used by [`DnsCache`](super::DnsCache).
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// Resolver backed by the operating system (getaddrinfo via tokio).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| DnsError::LookupFailed {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}
