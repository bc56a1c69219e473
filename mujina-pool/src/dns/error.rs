use thiserror::Error;

/// Resolution failures, delivered to every request waiting on a host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("lookup of {host} failed: {reason}")]
    LookupFailed { host: String, reason: String },

    #[error("no usable records for {0}")]
    NoRecords(String),

    /// The cache went away before the lookup finished
    #[error("resolution cancelled")]
    Cancelled,
}
