//! Error types for the stratum client.

use thiserror::Error;

use crate::dns::DnsError;
use crate::job::{Algorithm, JobError};
use crate::tls::TlsError;

/// Stratum protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Job description failed validation
    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobError),

    /// Pool answered the login with an error member
    #[error("Login rejected: {0}")]
    LoginRejected(String),

    /// Message is structurally invalid (missing field, wrong type)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Socket, proxy or DNS failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connect or login did not complete in time
    #[error("Timeout waiting for pool")]
    Timeout,

    /// The owner does not accept jobs for this algorithm
    #[error("Algorithm {0} refused")]
    AlgorithmRefused(Algorithm),

    /// The client ran out of retries
    #[error("Retry budget exceeded after {0} failures")]
    RetryBudgetExceeded(u32),

    /// Submit with no authoritative client
    #[error("No active pool")]
    NotActive,

    /// Submit on a client that is not logged in
    #[error("Not logged in")]
    NotLoggedIn,

    /// Result belongs to a previous session
    #[error("Stale result for session {0}")]
    StaleResult(String),

    /// Invalid URL format
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DnsError> for StratumError {
    fn from(err: DnsError) -> Self {
        StratumError::Transport(err.to_string())
    }
}

impl From<TlsError> for StratumError {
    fn from(err: TlsError) -> Self {
        StratumError::Transport(err.to_string())
    }
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;
