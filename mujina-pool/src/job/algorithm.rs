//! Algorithm tags and their blob layout.
//!
//! Pools name algorithms with short strings such as `rx/0` or `kawpow`. The
//! engine never hashes anything itself; it only needs to know where the
//! nonce lives inside a blob, how wide it is, and whether the algorithm is
//! memory-hard (needs a seed hash).

use strum::{Display, EnumIter, EnumString};

/// Algorithm family, used to select blob layout and protocol dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    CryptoNight,
    CryptoNightLite,
    CryptoNightHeavy,
    CryptoNightPico,
    RandomX,
    Argon2,
    KawPow,
    GhostRider,
}

/// Algorithm tag carried by a job.
///
/// Parsing is case-insensitive and accepts a few historical aliases:
///
/// ```
/// use mujina_pool::job::Algorithm;
///
/// assert_eq!("RX/0".parse::<Algorithm>().unwrap(), Algorithm::Rx0);
/// assert_eq!("randomx".parse::<Algorithm>().unwrap(), Algorithm::Rx0);
/// assert_eq!(Algorithm::KawPow.to_string(), "kawpow");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Algorithm {
    #[strum(to_string = "cn/0", serialize = "cryptonight")]
    Cn0,
    #[strum(to_string = "cn/1", serialize = "cryptonight/1")]
    Cn1,
    #[strum(to_string = "cn/2", serialize = "cryptonight/2")]
    Cn2,
    #[strum(to_string = "cn/r", serialize = "cryptonight/r")]
    CnR,
    #[strum(to_string = "cn/half")]
    CnHalf,
    #[strum(to_string = "cn/rwz")]
    CnRwz,
    #[strum(to_string = "cn/zls")]
    CnZls,
    #[strum(to_string = "cn/double")]
    CnDouble,
    #[strum(to_string = "cn/ccx")]
    CnCcx,
    #[strum(to_string = "cn-lite/1", serialize = "cryptonight-lite/1")]
    CnLite1,
    #[strum(to_string = "cn-heavy/0", serialize = "cryptonight-heavy")]
    CnHeavy0,
    #[strum(to_string = "cn-heavy/xhv")]
    CnHeavyXhv,
    #[strum(to_string = "cn-heavy/tube")]
    CnHeavyTube,
    #[strum(to_string = "cn-pico", serialize = "cn-pico/trtl")]
    CnPico,
    #[strum(to_string = "cn-pico/tlo")]
    CnPicoTlo,
    #[strum(to_string = "rx/0", serialize = "randomx", serialize = "rx/test")]
    Rx0,
    #[strum(to_string = "rx/wow", serialize = "randomwow")]
    RxWow,
    #[strum(to_string = "rx/arq", serialize = "randomarq")]
    RxArq,
    #[strum(to_string = "rx/graft")]
    RxGraft,
    #[strum(to_string = "rx/sfx")]
    RxSfx,
    #[strum(to_string = "rx/yada")]
    RxYada,
    #[strum(to_string = "argon2/chukwa", serialize = "chukwa")]
    Argon2Chukwa,
    #[strum(to_string = "argon2/chukwav2", serialize = "chukwav2")]
    Argon2ChukwaV2,
    #[strum(to_string = "argon2/ninja")]
    Argon2Ninja,
    #[strum(to_string = "kawpow", serialize = "kawpow/rvn")]
    KawPow,
    #[strum(to_string = "ghostrider", serialize = "gr")]
    GhostRider,
}

/// Default nonce offset for CryptoNote-style hashing blobs.
const DEFAULT_NONCE_OFFSET: usize = 39;

impl Algorithm {
    /// Family this algorithm belongs to.
    pub fn family(self) -> Family {
        use Algorithm::*;

        match self {
            Cn0 | Cn1 | Cn2 | CnR | CnHalf | CnRwz | CnZls | CnDouble | CnCcx => {
                Family::CryptoNight
            }
            CnLite1 => Family::CryptoNightLite,
            CnHeavy0 | CnHeavyXhv | CnHeavyTube => Family::CryptoNightHeavy,
            CnPico | CnPicoTlo => Family::CryptoNightPico,
            Rx0 | RxWow | RxArq | RxGraft | RxSfx | RxYada => Family::RandomX,
            Argon2Chukwa | Argon2ChukwaV2 | Argon2Ninja => Family::Argon2,
            KawPow => Family::KawPow,
            GhostRider => Family::GhostRider,
        }
    }

    /// Byte offset of the nonce field inside a hashing blob.
    pub fn nonce_offset(self) -> usize {
        match self.family() {
            Family::KawPow => 32,
            Family::GhostRider => 76,
            _ if self == Algorithm::RxYada => 147,
            _ => DEFAULT_NONCE_OFFSET,
        }
    }

    /// Width of the nonce field in bytes.
    pub fn nonce_size(self) -> usize {
        match self.family() {
            Family::KawPow => 8,
            _ => 4,
        }
    }

    /// Whether jobs for this algorithm must carry a seed hash.
    pub fn requires_seed(self) -> bool {
        matches!(self.family(), Family::RandomX | Family::KawPow)
    }

    /// Whether pools speak the `mining.*` (EthereumStratum) dialect for it.
    pub fn uses_eth_dialect(self) -> bool {
        matches!(self.family(), Family::KawPow | Family::GhostRider)
    }

    /// Whether the target field is a plain hexadecimal number rather than
    /// a little-endian byte string.
    pub(crate) fn has_numeric_target(self) -> bool {
        self == Algorithm::RxYada
    }
}
