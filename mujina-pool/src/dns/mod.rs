//! Hostname resolution with per-host request sharing and a TTL cache.

mod cache;
mod error;
mod records;
mod resolver;

pub use cache::{DnsCache, DnsRequest, DEFAULT_TTL};
pub use error::DnsError;
pub use records::DnsRecords;
pub use resolver::{Resolver, SystemResolver};
