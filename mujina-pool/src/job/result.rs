//! Results flowing back from the hashing engine.

use std::time::Duration;

use tokio::time::Instant;

use super::algorithm::Algorithm;
use super::job::Job;

/// A nonce the hashing engine found for a job, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: String,
    /// Session id of the client the job came from.
    pub client_id: String,
    pub algorithm: Algorithm,
    pub nonce: u64,
    /// Final hash (proof of work).
    pub result: [u8; 32],
    /// Difficulty of the job at the time it was handed out.
    pub diff: u64,
    /// KawPow header hash.
    pub header_hash: Option<[u8; 32]>,
    /// KawPow mix hash.
    pub mix_hash: Option<[u8; 32]>,
    /// Miner signature, for jobs that carry signing keys.
    pub sig: Option<[u8; 64]>,
}

impl JobResult {
    /// Result for `job` with the given nonce and hash.
    pub fn new(job: &Job, nonce: u64, result: [u8; 32]) -> Self {
        Self {
            job_id: job.id().to_string(),
            client_id: job.client_id().to_string(),
            algorithm: job.algorithm(),
            nonce,
            result,
            diff: job.diff(),
            header_hash: None,
            mix_hash: None,
            sig: None,
        }
    }

    pub fn with_kawpow(mut self, header_hash: [u8; 32], mix_hash: [u8; 32]) -> Self {
        self.header_hash = Some(header_hash);
        self.mix_hash = Some(mix_hash);
        self
    }

    pub fn with_sig(mut self, sig: [u8; 64]) -> Self {
        self.sig = Some(sig);
        self
    }

    /// Difficulty the hash actually reached.
    ///
    /// Computed from the top 64 bits of the hash read as a little-endian
    /// number, the same way the pool checks it.
    pub fn actual_diff(&self) -> u64 {
        let mut top = [0u8; 8];
        top.copy_from_slice(&self.result[24..32]);
        super::to_diff(u64::from_le_bytes(top))
    }

    /// Nonce as the hex string pools expect: little-endian bytes, as wide as
    /// the algorithm's nonce field.
    pub fn nonce_hex(&self) -> String {
        let size = self.algorithm.nonce_size();
        hex::encode(&self.nonce.to_le_bytes()[..size])
    }
}

/// Bookkeeping for one in-flight submission.
///
/// Created by the client when it writes a submit request and handed back
/// with the pool's acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    /// Request id the submission was sent with.
    pub seq: u64,
    pub diff: u64,
    pub actual_diff: u64,
    submitted_at: Instant,
    elapsed: Option<Duration>,
}

impl SubmitResult {
    pub fn new(seq: u64, diff: u64, actual_diff: u64) -> Self {
        Self {
            seq,
            diff,
            actual_diff,
            submitted_at: Instant::now(),
            elapsed: None,
        }
    }

    /// Stamp the round-trip time once the pool replied.
    pub fn done(&mut self) {
        self.elapsed = Some(self.submitted_at.elapsed());
    }

    /// Round-trip latency, known after [`done`](Self::done).
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        let mut job = Job::new(Algorithm::Rx0, false, "session");
        job.set_blob(&"00".repeat(76)).unwrap();
        job.set_target("e4a63d00").unwrap();
        job.set_id("42");
        job
    }

    #[test]
    fn test_result_from_job() {
        let job = job();
        let result = JobResult::new(&job, 0x1234_5678, [0; 32]);
        assert_eq!(result.job_id, "42");
        assert_eq!(result.client_id, "session");
        assert_eq!(result.diff, job.diff());
        assert_eq!(result.nonce_hex(), "78563412");
    }

    #[test]
    fn test_actual_diff_from_hash_tail() {
        let mut hash = [0u8; 32];
        hash[24..32].copy_from_slice(&0x0000_0000_ffff_ffffu64.to_le_bytes());
        let result = JobResult::new(&job(), 0, hash);
        assert_eq!(result.actual_diff(), u64::MAX / 0xffff_ffff);

        let result = JobResult::new(&job(), 0, [0; 32]);
        assert_eq!(result.actual_diff(), 0);
    }

    #[test]
    fn test_kawpow_nonce_is_eight_bytes() {
        let mut job = Job::new(Algorithm::KawPow, false, "session");
        job.set_blob(&"00".repeat(40)).unwrap();
        job.set_diff(1000).unwrap();
        let result = JobResult::new(&job, 0x0102, [0; 32]).with_kawpow([1; 32], [2; 32]);
        assert_eq!(result.nonce_hex(), "0201000000000000");
        assert_eq!(result.mix_hash, Some([2; 32]));
    }

    #[test]
    fn test_submit_latency_stamped_on_done() {
        let mut submit = SubmitResult::new(7, 100, 150);
        assert!(submit.elapsed().is_none());
        submit.done();
        assert!(submit.elapsed().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_latency_follows_runtime_clock() {
        let mut submit = SubmitResult::new(8, 100, 150);
        tokio::time::advance(Duration::from_millis(250)).await;
        submit.done();
        assert_eq!(submit.elapsed(), Some(Duration::from_millis(250)));
    }
}
