//! Work unit issued by a pool.

use super::algorithm::{Algorithm, Family};
use super::blob::WorkBlob;
use super::error::JobError;

/// Largest hashing blob accepted from a pool, in bytes.
pub const MAX_BLOB_SIZE: usize = 408;

/// Size of a seed hash in bytes.
pub const SEED_SIZE: usize = 32;

/// Size of the per-job signing key pair in bytes (public + secret).
const SIG_KEY_SIZE: usize = 64;

/// Convert a 64-bit target to difficulty (and back; the mapping is its own
/// inverse up to integer rounding).
pub fn to_diff(target: u64) -> u64 {
    if target == 0 {
        0
    } else {
        u64::MAX / target
    }
}

/// Ephemeral key pair some pools attach to a job for miner signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeys {
    pub public: [u8; 32],
    pub secret: [u8; 32],
}

/// One unit of hashing work.
///
/// A job is built by the stratum client from a pool notification and is not
/// modified after that; the next notification produces a new job. The
/// hashing engine receives a clone and varies the nonce on a [`WorkBlob`]
/// obtained from [`Job::work_blob`], never on the job itself.
///
/// Equality compares the job id, the owning session, the blob bytes and the
/// target. Work reissued under a new job id is a different job, since
/// results must name the id the pool currently knows.
#[derive(Debug, Clone)]
pub struct Job {
    algorithm: Algorithm,
    nicehash: bool,
    client_id: String,
    id: String,
    blob: Vec<u8>,
    target: u64,
    diff: u64,
    seed: Option<[u8; SEED_SIZE]>,
    extra_nonce: Option<Vec<u8>>,
    sig_keys: Option<SigningKeys>,
    height: u64,
    sequence: u64,
}

impl Job {
    /// Create an empty job for a session.
    ///
    /// `nicehash` forces externally-nonced mode; it is also switched on by
    /// [`set_blob`](Self::set_blob) when the pool pre-fills the nonce.
    pub fn new(algorithm: Algorithm, nicehash: bool, client_id: impl Into<String>) -> Self {
        Self {
            algorithm,
            nicehash,
            client_id: client_id.into(),
            id: String::new(),
            blob: Vec::new(),
            target: 0,
            diff: 0,
            seed: None,
            extra_nonce: None,
            sig_keys: None,
            height: 0,
            sequence: 0,
        }
    }

    /// Decode and store the hashing blob.
    pub fn set_blob(&mut self, hex_blob: &str) -> Result<(), JobError> {
        if hex_blob.len() % 2 != 0 {
            return Err(JobError::MalformedBlob(format!(
                "odd hex length {}",
                hex_blob.len()
            )));
        }

        let size = hex_blob.len() / 2;
        let min_size = self.nonce_offset() + self.nonce_size();
        if size < min_size {
            return Err(JobError::MalformedBlob(format!(
                "{} bytes, {} needs at least {}",
                size, self.algorithm, min_size
            )));
        }
        if size > MAX_BLOB_SIZE {
            return Err(JobError::MalformedBlob(format!(
                "{} bytes exceeds maximum of {}",
                size, MAX_BLOB_SIZE
            )));
        }

        let blob = hex::decode(hex_blob).map_err(|e| JobError::MalformedBlob(e.to_string()))?;
        self.blob = blob;

        if self.nonce() != 0 {
            self.nicehash = true;
        }

        Ok(())
    }

    /// Parse a target in the pool's string encoding.
    ///
    /// Four hex bytes are a compact 32-bit target, eight hex bytes a full
    /// 64-bit target, both little-endian. `rx/yada` pools send a plain hex
    /// number instead.
    pub fn set_target(&mut self, target: &str) -> Result<(), JobError> {
        if target.len() < 4 {
            return Err(JobError::InvalidTarget(format!("too short: {:?}", target)));
        }

        let value = if self.algorithm.has_numeric_target() {
            u64::from_str_radix(target, 16).map_err(|e| JobError::InvalidTarget(e.to_string()))?
        } else {
            let raw = hex::decode(target).map_err(|e| JobError::InvalidTarget(e.to_string()))?;
            match raw.len() {
                4 => {
                    let compact = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                    if compact == 0 {
                        0
                    } else {
                        u64::MAX / (u64::from(u32::MAX) / u64::from(compact))
                    }
                }
                8 => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&raw);
                    u64::from_le_bytes(bytes)
                }
                n => {
                    return Err(JobError::InvalidTarget(format!(
                        "unexpected length {} bytes",
                        n
                    )))
                }
            }
        };

        self.set_target_value(value)
    }

    /// Set the 64-bit target directly.
    pub fn set_target_value(&mut self, target: u64) -> Result<(), JobError> {
        if target == 0 {
            return Err(JobError::InvalidTarget("zero target".to_string()));
        }

        self.target = target;
        self.diff = to_diff(target);
        Ok(())
    }

    /// Set the difficulty; the target follows.
    pub fn set_diff(&mut self, diff: u64) -> Result<(), JobError> {
        if diff == 0 {
            return Err(JobError::InvalidTarget("zero difficulty".to_string()));
        }

        self.diff = diff;
        self.target = to_diff(diff);
        Ok(())
    }

    pub fn set_seed_hash(&mut self, seed: &str) -> Result<(), JobError> {
        if seed.len() != SEED_SIZE * 2 {
            return Err(JobError::InvalidSeed(format!(
                "expected {} hex characters, got {}",
                SEED_SIZE * 2,
                seed.len()
            )));
        }

        let mut bytes = [0u8; SEED_SIZE];
        hex::decode_to_slice(seed, &mut bytes).map_err(|e| JobError::InvalidSeed(e.to_string()))?;
        self.seed = Some(bytes);
        Ok(())
    }

    pub fn set_sig_key(&mut self, key: &str) -> Result<(), JobError> {
        if key.len() != SIG_KEY_SIZE * 2 {
            return Err(JobError::InvalidSigKey(format!(
                "expected {} hex characters, got {}",
                SIG_KEY_SIZE * 2,
                key.len()
            )));
        }

        let mut bytes = [0u8; SIG_KEY_SIZE];
        hex::decode_to_slice(key, &mut bytes)
            .map_err(|e| JobError::InvalidSigKey(e.to_string()))?;

        let mut public = [0u8; 32];
        let mut secret = [0u8; 32];
        public.copy_from_slice(&bytes[..32]);
        secret.copy_from_slice(&bytes[32..]);
        self.sig_keys = Some(SigningKeys { public, secret });
        Ok(())
    }

    /// Pool-assigned nonce prefix for 8-byte nonces.
    pub fn set_extra_nonce(&mut self, extra_nonce: Vec<u8>) {
        self.extra_nonce = if extra_nonce.is_empty() {
            None
        } else {
            Some(extra_nonce)
        };
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Blob as lowercase hex.
    pub fn blob_hex(&self) -> String {
        hex::encode(&self.blob)
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn diff(&self) -> u64 {
        self.diff
    }

    pub fn seed(&self) -> Option<&[u8; SEED_SIZE]> {
        self.seed.as_ref()
    }

    pub fn extra_nonce(&self) -> Option<&[u8]> {
        self.extra_nonce.as_deref()
    }

    pub fn sig_keys(&self) -> Option<&SigningKeys> {
        self.sig_keys.as_ref()
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the pool pre-assigns nonce ranges (nicehash mode).
    pub fn is_nicehash(&self) -> bool {
        self.nicehash
    }

    pub fn nonce_offset(&self) -> usize {
        self.algorithm.nonce_offset()
    }

    pub fn nonce_size(&self) -> usize {
        self.algorithm.nonce_size()
    }

    /// Current value of the nonce field, little-endian.
    pub fn nonce(&self) -> u64 {
        read_nonce(&self.blob, self.nonce_offset(), self.nonce_size())
    }

    /// A job is usable once it has a blob and a target.
    pub fn is_valid(&self) -> bool {
        !self.blob.is_empty() && self.target != 0
    }

    /// Fresh mutable copy of the blob for nonce patching.
    pub fn work_blob(&self) -> WorkBlob {
        WorkBlob::new(self)
    }

    /// Number of transactions encoded at the end of the hashing blob.
    ///
    /// CryptoNote coins append the transaction count as a varint after the
    /// merkle root. Returns 0 for algorithms whose blobs don't carry it.
    pub fn num_transactions(&self) -> u32 {
        let carries_count = matches!(
            self.algorithm.family(),
            Family::CryptoNight
                | Family::CryptoNightLite
                | Family::CryptoNightHeavy
                | Family::CryptoNightPico
                | Family::RandomX
        );
        if !carries_count {
            return 0;
        }

        let offset = if self.algorithm == Algorithm::RxWow {
            141
        } else {
            75
        };

        let size = self.blob.len();
        if size <= offset || size > offset + 4 {
            return 0;
        }

        let mut count = 0u32;
        for (shift, byte) in (0..).step_by(7).zip(&self.blob[offset..]) {
            count |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
        }
        count
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.client_id == other.client_id
            && self.blob == other.blob
            && self.target == other.target
    }
}

impl Eq for Job {}

pub(super) fn read_nonce(blob: &[u8], offset: usize, size: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..size].copy_from_slice(&blob[offset..offset + size]);
    u64::from_le_bytes(bytes)
}
