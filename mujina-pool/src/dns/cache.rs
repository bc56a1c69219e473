use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::{DnsError, DnsRecords, Resolver, SystemResolver};
use crate::tracing::prelude::*;

/// Lifetime of cached records when the caller passes a zero TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

type Reply = Result<DnsRecords, DnsError>;

/// Per-host resolution cache.
///
/// Each hostname gets one backend holding its last good records and the
/// requests currently waiting on it. Only one lookup per hostname is ever in
/// flight; every request that arrives while it runs is answered from the
/// same result. Expired records are not evicted in the background, they are
/// refreshed by the next [`resolve`](Self::resolve) that finds them stale.
///
/// The cache is an ordinary shared object: wrap it in an `Arc` and hand it
/// to whoever needs to resolve pool hostnames.
pub struct DnsCache {
    resolver: Arc<dyn Resolver>,
    default_ttl: Duration,
    backends: Mutex<HashMap<String, Arc<Mutex<Backend>>>>,
}

#[derive(Default)]
struct Backend {
    cached: Option<Cached>,
    waiters: Vec<oneshot::Sender<Reply>>,
    in_flight: bool,
}

struct Cached {
    records: DnsRecords,
    resolved_at: Instant,
}

impl DnsCache {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self::with_default_ttl(resolver, DEFAULT_TTL)
    }

    pub fn with_default_ttl(resolver: Arc<dyn Resolver>, default_ttl: Duration) -> Self {
        Self {
            resolver,
            default_ttl,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Cache backed by the system resolver.
    pub fn system(default_ttl: Duration) -> Self {
        Self::with_default_ttl(Arc::new(SystemResolver), default_ttl)
    }

    /// Request the records for `host`.
    ///
    /// Must be called from within a tokio runtime; a lookup, if one is
    /// needed, runs as a spawned task. A `ttl` of zero means the cache
    /// default.
    pub fn resolve(&self, host: &str, ttl: Duration) -> DnsRequest {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let (tx, rx) = oneshot::channel();
        let backend = self.backend(host);

        let mut state = backend.lock();
        if let Some(cached) = &state.cached {
            if cached.resolved_at.elapsed() <= ttl {
                trace!(host, "DNS cache hit");
                let _ = tx.send(Ok(cached.records.clone()));
                return DnsRequest { rx };
            }
        }

        state.waiters.retain(|waiter| !waiter.is_closed());
        state.waiters.push(tx);

        if !state.in_flight {
            state.in_flight = true;
            drop(state);
            tokio::spawn(lookup(self.resolver.clone(), backend, host.to_string()));
        }

        DnsRequest { rx }
    }

    /// Number of hostnames the cache has seen.
    pub fn len(&self) -> usize {
        self.backends.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn backend(&self, host: &str) -> Arc<Mutex<Backend>> {
        self.backends
            .lock()
            .entry(host.to_string())
            .or_default()
            .clone()
    }
}

async fn lookup(resolver: Arc<dyn Resolver>, backend: Arc<Mutex<Backend>>, host: String) {
    debug!(host = %host, "Resolving");

    let result = match resolver.lookup(&host).await {
        Ok(addrs) => {
            let records = DnsRecords::from_addrs(addrs);
            if records.is_empty() {
                Err(DnsError::NoRecords(host.clone()))
            } else {
                Ok(records)
            }
        }
        Err(e) => Err(e),
    };

    let waiters = {
        let mut state = backend.lock();
        state.in_flight = false;
        if let Ok(records) = &result {
            state.cached = Some(Cached {
                records: records.clone(),
                resolved_at: Instant::now(),
            });
        }
        std::mem::take(&mut state.waiters)
    };

    match &result {
        Ok(records) => debug!(
            host = %host,
            ipv4 = records.ipv4.len(),
            ipv6 = records.ipv6.len(),
            waiters = waiters.len(),
            "Resolved"
        ),
        Err(e) => warn!(host = %host, error = %e, "DNS lookup failed"),
    }

    for waiter in waiters {
        // Receiver gone means the caller abandoned the request
        let _ = waiter.send(result.clone());
    }
}

/// Pending resolution. Dropping it abandons the request without affecting
/// other requests for the same host.
pub struct DnsRequest {
    rx: oneshot::Receiver<Reply>,
}

impl Future for DnsRequest {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.unwrap_or(Err(DnsError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver that counts lookups and takes a while to answer.
    #[derive(Default)]
    struct CountingResolver {
        lookups: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Resolver for CountingResolver {
        async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            if self.fail {
                return Err(DnsError::LookupFailed {
                    host: host.to_string(),
                    reason: "NXDOMAIN".to_string(),
                });
            }
            Ok(vec!["192.0.2.1".parse().unwrap()])
        }
    }

    fn cache() -> (Arc<CountingResolver>, DnsCache) {
        let resolver = Arc::new(CountingResolver::default());
        let cache = DnsCache::new(resolver.clone());
        (resolver, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_lookup() {
        let (resolver, cache) = cache();

        let a = cache.resolve("pool.example.com", Duration::ZERO);
        let b = cache.resolve("pool.example.com", Duration::ZERO);
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_within_ttl() {
        let (resolver, cache) = cache();

        cache.resolve("pool.example.com", Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let records = cache.resolve("pool.example.com", Duration::ZERO).await.unwrap();

        assert_eq!(records.get(false), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refreshed() {
        let (resolver, cache) = cache();

        cache.resolve("pool.example.com", Duration::ZERO).await.unwrap();
        tokio::time::advance(DEFAULT_TTL + Duration::from_secs(1)).await;
        cache.resolve("pool.example.com", Duration::ZERO).await.unwrap();

        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_request_ttl() {
        let (resolver, cache) = cache();

        cache.resolve("pool.example.com", Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.resolve("pool.example.com", Duration::from_secs(2)).await.unwrap();

        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let (resolver, cache) = cache();

        let a = cache.resolve("a.example.com", Duration::ZERO);
        let b = cache.resolve("b.example.com", Duration::ZERO);
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_does_not_disturb_others() {
        let (resolver, cache) = cache();

        let abandoned = cache.resolve("pool.example.com", Duration::ZERO);
        let kept = cache.resolve("pool.example.com", Duration::ZERO);
        drop(abandoned);

        assert!(kept.await.is_ok());
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_all_waiters_and_is_not_cached() {
        let resolver = Arc::new(CountingResolver {
            fail: true,
            ..Default::default()
        });
        let cache = DnsCache::new(resolver.clone());

        let a = cache.resolve("nowhere.invalid", Duration::ZERO);
        let b = cache.resolve("nowhere.invalid", Duration::ZERO);
        let (a, b) = tokio::join!(a, b);
        assert!(matches!(a, Err(DnsError::LookupFailed { .. })));
        assert_eq!(a, b);

        let again = cache.resolve("nowhere.invalid", Duration::ZERO).await;
        assert!(again.is_err());
        assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_system_resolver_passes_literals_through() {
        let addrs = SystemResolver.lookup("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }
}
