//! Pool selection.
//!
//! A strategy owns a set of stratum clients and decides which one is
//! authoritative: only that client's jobs reach the listener and only that
//! client receives results. The listener learns about changes through
//! [`StrategyEvent`]s on an unbounded channel.
//!
//! ```text
//! Strategy                             Listener
//!   |  Active { client_id, pool, .. }      |
//!   |------------------------------------->|
//!   |  Job { client_id, job, .. }          |
//!   |------------------------------------->|  (hash)
//!   |                submit(JobResult)     |
//!   |<-------------------------------------|
//!   |  ResultAccepted { result, error }    |
//!   |------------------------------------->|
//! ```

mod failover;

use std::net::IpAddr;

use serde_json::Value;

use crate::job::{Job, SubmitResult};
use crate::stratum::PoolUrl;
use crate::tls::TlsInfo;

pub use failover::FailoverStrategy;

/// What the listener hears from a strategy.
#[derive(Debug, Clone)]
pub enum StrategyEvent {
    /// A client became authoritative.
    Active {
        client_id: usize,
        pool: PoolUrl,
        ip: Option<IpAddr>,
        tls: Option<TlsInfo>,
    },
    /// New work from the authoritative client. `params` is the raw
    /// notification, or null when re-delivered by `resume`.
    Job {
        client_id: usize,
        job: Job,
        params: Value,
    },
    /// No client is authoritative any more; stop hashing.
    Paused,
    /// The pool answered a submission. `error` is `None` if it was accepted.
    ResultAccepted {
        client_id: usize,
        result: SubmitResult,
        error: Option<String>,
    },
}
