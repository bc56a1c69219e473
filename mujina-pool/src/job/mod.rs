//! Work units and the results computed for them.
//!
//! A [`Job`] is the validated form of a pool's job notification. It is sealed
//! after construction; the hashing engine patches nonces on a [`WorkBlob`]
//! and reports back with a [`JobResult`].

mod algorithm;
mod blob;
mod error;
#[allow(clippy::module_inception)]
mod job;
mod result;

pub use algorithm::{Algorithm, Family};
pub use blob::WorkBlob;
pub use error::JobError;
pub use job::{to_diff, Job, SigningKeys, MAX_BLOB_SIZE, SEED_SIZE};
pub use result::{JobResult, SubmitResult};
