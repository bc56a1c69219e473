//! Error types for work unit validation.

use thiserror::Error;

/// Reasons a job description from a pool is refused.
///
/// These are input-validation failures: the offending job is dropped but the
/// connection it arrived on stays up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Blob is not valid hex or its length is out of bounds
    #[error("malformed blob: {0}")]
    MalformedBlob(String),

    /// Target string could not be parsed or evaluates to zero
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Seed hash is not exactly 32 bytes of hex
    #[error("invalid seed hash: {0}")]
    InvalidSeed(String),

    /// Signing key is not exactly 64 bytes of hex
    #[error("invalid signing key: {0}")]
    InvalidSigKey(String),
}
