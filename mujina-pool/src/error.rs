//! Common error types for mujina-pool.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from the error types of each module.

use thiserror::Error;

use crate::dns::DnsError;
use crate::job::JobError;
use crate::stratum::StratumError;
use crate::tls::TlsError;

/// Main error type for mujina-pool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid job from a pool
    #[error(transparent)]
    Job(#[from] JobError),

    /// Pool communication errors
    #[error(transparent)]
    Stratum(#[from] StratumError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Dns(#[from] DnsError),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
