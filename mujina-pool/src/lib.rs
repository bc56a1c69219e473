//! Mining pool protocol engine.
//!
//! Keeps connections to stratum pools, turns their job notifications into
//! validated [`job::Job`]s, fails over between pools and submits results
//! back through whichever pool is authoritative.

pub mod config;
pub mod daemon;
pub mod dns;
pub mod error;
pub mod job;
pub mod network;
pub mod stats;
pub mod status;
pub mod strategy;
pub mod stratum;
pub mod tls;
pub mod tracing;
