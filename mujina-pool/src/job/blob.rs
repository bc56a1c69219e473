//! Patchable working copy of a job blob.

use super::job::{read_nonce, Job};

/// Mutable view of a [`Job`]'s blob for the hashing engine.
///
/// The job stays sealed; the engine takes a `WorkBlob` and writes candidate
/// nonces into it. Bytes of the nonce field reserved by the pool are never
/// overwritten:
///
/// - in nicehash mode the top byte of a 4-byte nonce belongs to the pool,
/// - with an extra nonce, its bytes occupy the top of an 8-byte nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkBlob {
    bytes: Vec<u8>,
    nonce_offset: usize,
    nonce_size: usize,
    reserved: usize,
}

impl WorkBlob {
    pub(super) fn new(job: &Job) -> Self {
        let nonce_size = job.nonce_size();
        let extra_nonce = job.extra_nonce().filter(|en| en.len() < nonce_size);

        let reserved = match extra_nonce {
            Some(en) if nonce_size == 8 => en.len(),
            _ if job.is_nicehash() => 1,
            _ => 0,
        };

        let mut blob = Self {
            bytes: job.blob().to_vec(),
            nonce_offset: job.nonce_offset(),
            nonce_size,
            reserved,
        };

        if let (Some(en), 8) = (extra_nonce, nonce_size) {
            let prefix = en.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            blob.write_raw(prefix << (8 * (nonce_size - en.len())));
        }

        blob
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn nonce_offset(&self) -> usize {
        self.nonce_offset
    }

    pub fn nonce_size(&self) -> usize {
        self.nonce_size
    }

    /// Current nonce field, including any pool-reserved bytes.
    pub fn nonce(&self) -> u64 {
        read_nonce(&self.bytes, self.nonce_offset, self.nonce_size)
    }

    /// Bits of the nonce the engine is free to vary.
    pub fn nonce_mask(&self) -> u64 {
        let full = if self.nonce_size == 8 {
            u64::MAX
        } else {
            (1u64 << (8 * self.nonce_size)) - 1
        };
        full >> (8 * self.reserved)
    }

    /// Write the engine-owned part of the nonce; reserved bytes are kept.
    pub fn set_nonce(&mut self, nonce: u64) {
        let mask = self.nonce_mask();
        let value = (self.nonce() & !mask) | (nonce & mask);
        self.write_raw(value);
    }

    fn write_raw(&mut self, value: u64) {
        let end = self.nonce_offset + self.nonce_size;
        self.bytes[self.nonce_offset..end].copy_from_slice(&value.to_le_bytes()[..self.nonce_size]);
    }
}

#[cfg(test)]
mod tests {
    use super::super::algorithm::Algorithm;
    use super::*;

    fn job_with_blob(algo: Algorithm, blob: &str) -> Job {
        let mut job = Job::new(algo, false, "session");
        job.set_blob(blob).unwrap();
        job.set_target("e4a63d00").unwrap();
        job
    }

    #[test]
    fn test_patch_does_not_touch_job() {
        let job = job_with_blob(Algorithm::Rx0, &"00".repeat(76));
        let mut work = job.work_blob();
        work.set_nonce(0xdeadbeef);

        assert_eq!(work.nonce(), 0xdeadbeef);
        assert_eq!(&work.as_bytes()[39..43], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(job.nonce(), 0);
    }

    #[test]
    fn test_nicehash_keeps_pool_byte() {
        let mut blob = "00".repeat(76);
        blob.replace_range(84..86, "5a");
        let job = job_with_blob(Algorithm::Rx0, &blob);
        assert!(job.is_nicehash());

        let mut work = job.work_blob();
        assert_eq!(work.nonce_mask(), 0x00ff_ffff);
        work.set_nonce(0xffff_ffff);
        assert_eq!(work.nonce(), 0x5aff_ffff);
    }

    #[test]
    fn test_extra_nonce_prefixes_wide_nonce() {
        let mut job = job_with_blob(Algorithm::KawPow, &"00".repeat(40));
        job.set_extra_nonce(vec![0xab, 0xcd]);

        let mut work = job.work_blob();
        assert_eq!(work.nonce(), 0xabcd_0000_0000_0000);
        assert_eq!(work.nonce_mask(), 0x0000_ffff_ffff_ffff);

        work.set_nonce(0x1234);
        assert_eq!(work.nonce(), 0xabcd_0000_0000_1234);
        assert_eq!(&work.as_bytes()[32..40], &[0x34, 0x12, 0, 0, 0, 0, 0xcd, 0xab]);
    }

    #[test]
    fn test_copies_are_independent() {
        let job = job_with_blob(Algorithm::Rx0, &"00".repeat(76));
        let mut a = job.work_blob();
        let b = a.clone();
        a.set_nonce(7);
        assert_eq!(b.nonce(), 0);
    }
}
