//! The two stratum dialects pools speak.
//!
//! Both share the client state machine; what differs is how login works,
//! how jobs are encoded and how results are submitted. Every
//! dialect-specific decision goes through a method on [`Dialect`].
//!
//! # Default dialect
//!
//! - `login` with `{login, pass, agent, rigid, algo}`; the result carries the
//!   session `id` and the first `job`
//! - `job` notifications with `{job_id, blob, target, algo, height, seed_hash}`
//! - `submit` with `{id, job_id, nonce, result, algo}`, answered by
//!   `{"status": "OK"}` or an error object
//! - `keepalived` to keep idle sessions open
//!
//! # Eth dialect (EthereumStratum/1.0.0, used for KawPow and GhostRider)
//!
//! - `mining.subscribe` returns the extra nonce (and, for GhostRider, the
//!   extra nonce 2 size), then `mining.authorize`
//! - KawPow `mining.notify` with `[job_id, header_hash, seed_hash, target,
//!   clean, height, bits]`
//! - GhostRider `mining.notify` with `[job_id, prevhash, coinb1, coinb2,
//!   merkle_branch, version, nbits, ntime, clean]`; the client assembles the
//!   block header itself
//! - `mining.set_target`, `mining.set_difficulty`, `mining.set_extranonce`
//! - `mining.submit` with `[user, job_id, nonce, header_hash, mix_hash]`
//!   (KawPow) or `[user, job_id, extranonce2, ntime, nonce]` (GhostRider),
//!   answered by `true`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

use super::error::{StratumError, StratumResult};
use super::messages::{error_text, real_error, JsonRpcMessage};
use super::pool::Pool;
use crate::job::{Algorithm, Family, Job, JobResult};

/// Which dialect a pool is configured for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProtocolMode {
    #[default]
    Default,
    Eth,
    /// Log in with the default dialect and switch if the pool answers like
    /// an Eth pool.
    Auto,
}

/// Dialect in effect on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Default,
    Eth,
}

impl From<ProtocolMode> for Dialect {
    fn from(mode: ProtocolMode) -> Self {
        match mode {
            ProtocolMode::Eth => Dialect::Eth,
            ProtocolMode::Default | ProtocolMode::Auto => Dialect::Default,
        }
    }
}

/// Session state learned at login that later messages depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct Session {
    /// Pool-assigned id; jobs and results carry it as their client id.
    pub id: String,
    /// Algorithm of Eth-dialect jobs, which don't name one.
    pub algorithm: Option<Algorithm>,
    pub extra_nonce: Option<Vec<u8>>,
    /// Bytes of extra nonce 2 in a GhostRider coinbase.
    pub extra_nonce2_size: usize,
    /// Share target set by `mining.set_target` / `mining.set_difficulty`.
    pub target: u64,
    /// Header time of the current GhostRider job, echoed on submit.
    pub ntime: Option<String>,
}

impl Session {
    fn is_ghostrider(&self) -> bool {
        self.algorithm.map(Algorithm::family) == Some(Family::GhostRider)
    }

    /// Note what later submissions need from a newly accepted job.
    pub fn track_job(&mut self, job: &Job) {
        if job.algorithm().family() == Family::GhostRider {
            self.ntime = job.blob().get(NTIME_OFFSET..NTIME_OFFSET + 4).map(hex::encode);
        }
    }
}

/// Successful login, as understood by the dialect that answered.
#[derive(Debug)]
pub(super) struct Login {
    pub dialect: Dialect,
    pub session_id: String,
    pub extra_nonce: Option<Vec<u8>>,
    pub extra_nonce2_size: usize,
    pub algorithm: Option<Algorithm>,
    /// First job, sent along with the login result by default-dialect pools.
    pub job: Option<Value>,
}

/// A server-initiated message, decoded.
#[derive(Debug)]
pub(super) enum Notification {
    Job(Box<Job>),
    SetTarget(u64),
    SetExtraNonce(Vec<u8>),
    Reconnect,
    Ignored,
}

const ETH_PROTOCOL: &str = "EthereumStratum/1.0.0";

/// GhostRider pools express difficulty in units of 2^16.
const GHOSTRIDER_DIFF_FACTOR: f64 = 65536.0;

/// Offset of the time field in an 80-byte block header.
const NTIME_OFFSET: usize = 68;

impl Dialect {
    /// First request after the transport is ready.
    pub(super) fn login_request(
        self,
        id: u64,
        pool: &Pool,
        agent: &str,
        algorithms: &[Algorithm],
    ) -> JsonRpcMessage {
        match self {
            Dialect::Default => {
                let mut params = json!({
                    "login": pool.user,
                    "pass": pool.password,
                    "agent": agent,
                    "algo": algorithms.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                });
                if let Some(rig_id) = &pool.rig_id {
                    params["rigid"] = json!(rig_id);
                }
                JsonRpcMessage::request_v2(id, "login", params)
            }
            Dialect::Eth => {
                JsonRpcMessage::request(id, "mining.subscribe", json!([agent, ETH_PROTOCOL]))
            }
        }
    }

    pub(super) fn authorize_request(self, id: u64, pool: &Pool) -> JsonRpcMessage {
        JsonRpcMessage::request(id, "mining.authorize", json!([pool.user, pool.password]))
    }

    pub(super) fn keepalive_request(self, id: u64, session: &Session) -> Option<JsonRpcMessage> {
        match self {
            Dialect::Default => Some(JsonRpcMessage::request_v2(
                id,
                "keepalived",
                json!({ "id": session.id }),
            )),
            Dialect::Eth => None,
        }
    }

    /// Interpret the result of a `login` request.
    ///
    /// In [`ProtocolMode::Auto`] a result without a job but with an Eth-style
    /// algorithm and extra nonce switches the connection to the Eth dialect.
    pub(super) fn parse_login(result: &Value, mode: ProtocolMode) -> StratumResult<Login> {
        let session_id = result
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StratumError::Protocol("login result has no session id".to_string()))?
            .to_string();

        if let Some(job) = result.get("job").filter(|j| !j.is_null()) {
            return Ok(Login {
                dialect: Dialect::Default,
                session_id,
                extra_nonce: None,
                extra_nonce2_size: 0,
                algorithm: None,
                job: Some(job.clone()),
            });
        }

        if mode != ProtocolMode::Auto {
            return Err(StratumError::Protocol("login result has no job".to_string()));
        }

        let algo_name = result.get("algo").and_then(Value::as_str).unwrap_or_default();
        let algorithm = algo_name
            .parse::<Algorithm>()
            .ok()
            .filter(|a| a.uses_eth_dialect())
            .ok_or_else(|| {
                StratumError::Protocol(format!("unsupported Eth algorithm {:?}", algo_name))
            })?;

        let extra_nonce = result
            .get("extra_nonce")
            .and_then(Value::as_str)
            .ok_or_else(|| StratumError::Protocol("login result has no extra_nonce".to_string()))
            .and_then(|en| parse_extra_nonce(en, Some(algorithm)))?;

        let extra_nonce2_size = if algorithm.family() == Family::GhostRider {
            extra_nonce2_size(result.get("extra_nonce2_size"))?
        } else {
            0
        };

        Ok(Login {
            dialect: Dialect::Eth,
            session_id,
            extra_nonce: Some(extra_nonce),
            extra_nonce2_size,
            algorithm: Some(algorithm),
            job: None,
        })
    }

    /// Extra nonce (and extra nonce 2 size for GhostRider) from a
    /// `mining.subscribe` result: `[subscriptions, extranonce, size]`.
    pub(super) fn parse_subscribe(
        result: &Value,
        algorithm: Option<Algorithm>,
    ) -> StratumResult<(Vec<u8>, usize)> {
        let extra_nonce = result
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| StratumError::Protocol("subscribe result has no extranonce".to_string()))
            .and_then(|en| parse_extra_nonce(en, algorithm))?;

        let size = match algorithm.map(Algorithm::family) {
            Some(Family::GhostRider) => extra_nonce2_size(result.get(2))?,
            _ => 0,
        };
        Ok((extra_nonce, size))
    }

    /// Decode a server notification.
    pub(super) fn parse_notification(
        self,
        method: &str,
        params: &Value,
        session: &Session,
        pool: &Pool,
    ) -> StratumResult<Notification> {
        let job = |job: Job| Notification::Job(Box::new(job));

        match (self, method) {
            (_, "client.reconnect") => Ok(Notification::Reconnect),
            (Dialect::Default, "job") => parse_job(params, session, pool).map(job),
            (Dialect::Eth, "mining.notify") if session.is_ghostrider() => {
                parse_ghostrider_job(params, session).map(job)
            }
            (Dialect::Eth, "mining.notify") => parse_eth_job(params, session).map(job),
            (Dialect::Eth, "mining.set_target") => {
                let target = params
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| StratumError::Protocol("set_target without target".to_string()))
                    .and_then(parse_eth_target)?;
                Ok(Notification::SetTarget(target))
            }
            (Dialect::Eth, "mining.set_difficulty") => {
                let mut diff = params
                    .get(0)
                    .and_then(Value::as_f64)
                    .filter(|d| *d > 0.0)
                    .ok_or_else(|| StratumError::Protocol("invalid difficulty".to_string()))?;
                if session.is_ghostrider() {
                    diff = (diff * GHOSTRIDER_DIFF_FACTOR).ceil();
                }
                Ok(Notification::SetTarget(diff_to_target(diff)))
            }
            (Dialect::Eth, "mining.set_extranonce") => {
                let extra_nonce = params
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        StratumError::Protocol("set_extranonce without value".to_string())
                    })
                    .and_then(|en| parse_extra_nonce(en, session.algorithm))?;
                Ok(Notification::SetExtraNonce(extra_nonce))
            }
            _ => Ok(Notification::Ignored),
        }
    }

    pub(super) fn submit_request(
        self,
        id: u64,
        result: &JobResult,
        session: &Session,
        pool: &Pool,
    ) -> StratumResult<JsonRpcMessage> {
        match self {
            Dialect::Default => {
                let mut params = json!({
                    "id": session.id,
                    "job_id": result.job_id,
                    "nonce": result.nonce_hex(),
                    "result": hex::encode(result.result),
                    "algo": result.algorithm.to_string(),
                });
                if let Some(sig) = &result.sig {
                    params["sig"] = json!(hex::encode(sig));
                }
                Ok(JsonRpcMessage::request_v2(id, "submit", params))
            }
            Dialect::Eth if result.algorithm.family() == Family::GhostRider => {
                let ntime = session.ntime.as_ref().ok_or_else(|| {
                    StratumError::Protocol("no GhostRider job to submit against".to_string())
                })?;
                Ok(JsonRpcMessage::request(
                    id,
                    "mining.submit",
                    json!([
                        pool.user,
                        result.job_id,
                        "00".repeat(session.extra_nonce2_size),
                        ntime,
                        format!("{:08x}", result.nonce as u32),
                    ]),
                ))
            }
            Dialect::Eth => {
                let (Some(header), Some(mix)) = (&result.header_hash, &result.mix_hash) else {
                    return Err(StratumError::Protocol(
                        "Eth result needs header and mix hash".to_string(),
                    ));
                };
                Ok(JsonRpcMessage::request(
                    id,
                    "mining.submit",
                    json!([
                        pool.user,
                        result.job_id,
                        format!("0x{:016x}", result.nonce),
                        format!("0x{}", hex::encode(header)),
                        format!("0x{}", hex::encode(mix)),
                    ]),
                ))
            }
        }
    }

    /// `None` if the pool accepted a submission, otherwise the reason.
    pub(super) fn submit_outcome(
        self,
        result: &Option<Value>,
        error: &Option<Value>,
    ) -> Option<String> {
        if let Some(err) = real_error(error) {
            return Some(error_text(err));
        }

        match (self, result) {
            (Dialect::Default, Some(value)) if !value.is_null() => None,
            (Dialect::Eth, Some(Value::Bool(true))) => None,
            _ => Some("rejected".to_string()),
        }
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Decode an extra nonce. KawPow uses it as the top of its 8-byte nonce,
/// so it must leave room; GhostRider puts it in the coinbase.
fn parse_extra_nonce(hex_str: &str, algorithm: Option<Algorithm>) -> StratumResult<Vec<u8>> {
    let bytes = hex::decode(strip_hex_prefix(hex_str))
        .map_err(|e| StratumError::Protocol(format!("invalid extra nonce: {}", e)))?;
    let in_nonce = algorithm.map(Algorithm::family) != Some(Family::GhostRider);
    if in_nonce && bytes.len() >= 8 {
        return Err(StratumError::Protocol(format!(
            "extra nonce of {} bytes leaves no room for a nonce",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn extra_nonce2_size(value: Option<&Value>) -> StratumResult<usize> {
    value
        .and_then(Value::as_u64)
        .filter(|size| (1..=32).contains(size))
        .map(|size| size as usize)
        .ok_or_else(|| StratumError::Protocol("missing or invalid extra_nonce2_size".to_string()))
}

/// Eth targets are 256-bit big-endian hex; the top 64 bits are what counts.
fn parse_eth_target(target: &str) -> StratumResult<u64> {
    let target = strip_hex_prefix(target);
    let top = target
        .get(..16)
        .ok_or_else(|| StratumError::Protocol(format!("target too short: {:?}", target)))?;
    let value = u64::from_str_radix(top, 16)
        .map_err(|e| StratumError::Protocol(format!("invalid target: {}", e)))?;
    if value == 0 {
        return Err(StratumError::Protocol("zero target".to_string()));
    }
    Ok(value)
}

/// Share target for a pool difficulty, which may be fractional.
fn diff_to_target(diff: f64) -> u64 {
    if diff >= 1.0 && diff.fract() == 0.0 && diff < u64::MAX as f64 {
        u64::MAX / diff as u64
    } else {
        (u64::MAX as f64 / diff) as u64
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> StratumResult<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StratumError::Protocol(format!("job has no {}", key)))
}

fn parse_job(params: &Value, session: &Session, pool: &Pool) -> StratumResult<Job> {
    let job_id = required_str(params, "job_id")?;

    let algorithm = match params.get("algo").and_then(Value::as_str) {
        Some(name) => name
            .parse::<Algorithm>()
            .map_err(|_| StratumError::Protocol(format!("unknown algorithm {:?}", name)))?,
        None => pool
            .algorithm
            .ok_or_else(|| StratumError::Protocol("job has no algorithm".to_string()))?,
    };

    let mut job = Job::new(algorithm, pool.nicehash, session.id.clone());
    job.set_id(job_id);
    job.set_blob(required_str(params, "blob")?)?;
    job.set_target(required_str(params, "target")?)?;

    if let Some(height) = params.get("height").and_then(Value::as_u64) {
        job.set_height(height);
    }
    if algorithm.requires_seed() {
        let seed = params.get("seed_hash").and_then(Value::as_str).unwrap_or_default();
        job.set_seed_hash(seed)?;
    }
    if let Some(key) = params.get("sig_key").and_then(Value::as_str) {
        job.set_sig_key(key)?;
    }

    Ok(job)
}

/// Positional string member of a `mining.notify`.
fn notify_field<'a>(params: &'a Value, index: usize, name: &str) -> StratumResult<&'a str> {
    params
        .get(index)
        .and_then(Value::as_str)
        .map(strip_hex_prefix)
        .ok_or_else(|| StratumError::Protocol(format!("mining.notify has no {}", name)))
}

/// Like [`notify_field`] for a hex value of exactly `size` bytes.
fn notify_hex<'a>(
    params: &'a Value,
    index: usize,
    name: &str,
    size: usize,
) -> StratumResult<&'a str> {
    let value = notify_field(params, index, name)?;
    if value.len() != size * 2 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StratumError::Protocol(format!(
            "mining.notify {} must be {} hex bytes",
            name, size
        )));
    }
    Ok(value)
}

fn parse_eth_job(params: &Value, session: &Session) -> StratumResult<Job> {
    let job_id = notify_field(params, 0, "job id")?;
    let header_hash = notify_hex(params, 1, "header hash", 32)?;
    let seed_hash = notify_field(params, 2, "seed hash")?;

    let target = match params.get(3).and_then(Value::as_str).map(parse_eth_target) {
        Some(Ok(target)) => target,
        _ if session.target != 0 => session.target,
        _ => {
            return Err(StratumError::Protocol(
                "mining.notify has no usable target".to_string(),
            ))
        }
    };

    let algorithm = session
        .algorithm
        .filter(|a| a.family() == Family::KawPow)
        .unwrap_or(Algorithm::KawPow);
    let mut job = Job::new(algorithm, false, session.id.clone());
    job.set_id(job_id);
    job.set_blob(&format!("{}{}", header_hash, "0".repeat(16)))?;
    job.set_seed_hash(seed_hash)?;
    job.set_target_value(target)?;
    if let Some(height) = params.get(5).and_then(Value::as_u64) {
        job.set_height(height);
    }
    if let Some(extra_nonce) = &session.extra_nonce {
        job.set_extra_nonce(extra_nonce.clone());
    }

    Ok(job)
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

fn decode_hex(value: &str, name: &str) -> StratumResult<Vec<u8>> {
    hex::decode(value).map_err(|e| StratumError::Protocol(format!("invalid {}: {}", name, e)))
}

/// Build the 80-byte block header a GhostRider job hashes: version,
/// previous hash, merkle root, time, bits and a zero nonce.
fn parse_ghostrider_job(params: &Value, session: &Session) -> StratumResult<Job> {
    let job_id = notify_field(params, 0, "job id")?;
    let prev_hash = notify_hex(params, 1, "previous hash", 32)?;
    let coinbase1 = decode_hex(notify_field(params, 2, "coinbase 1")?, "coinbase 1")?;
    let coinbase2 = decode_hex(notify_field(params, 3, "coinbase 2")?, "coinbase 2")?;
    let branches = params
        .get(4)
        .and_then(Value::as_array)
        .ok_or_else(|| StratumError::Protocol("mining.notify has no merkle branch".to_string()))?;
    let version = notify_hex(params, 5, "version", 4)?;
    let bits = notify_hex(params, 6, "bits", 4)?;
    let ntime = notify_hex(params, 7, "time", 4)?;

    let extra_nonce = session
        .extra_nonce
        .as_deref()
        .ok_or_else(|| StratumError::Protocol("no extra nonce for coinbase".to_string()))?;
    if session.target == 0 {
        return Err(StratumError::Protocol(
            "GhostRider job before any difficulty".to_string(),
        ));
    }

    let mut coinbase = coinbase1;
    coinbase.extend_from_slice(extra_nonce);
    coinbase.resize(coinbase.len() + session.extra_nonce2_size, 0);
    coinbase.extend_from_slice(&coinbase2);

    let mut root = sha256d(&coinbase);
    for branch in branches {
        let branch = branch
            .as_str()
            .map(strip_hex_prefix)
            .filter(|b| b.len() == 64)
            .ok_or_else(|| StratumError::Protocol("invalid merkle branch".to_string()))?;
        let mut pair = root.to_vec();
        pair.extend_from_slice(&decode_hex(branch, "merkle branch")?);
        root = sha256d(&pair);
    }

    let header = format!(
        "{}{}{}{}{}00000000",
        version,
        prev_hash,
        hex::encode(root),
        ntime,
        bits
    );

    let mut job = Job::new(Algorithm::GhostRider, false, session.id.clone());
    job.set_id(job_id);
    job.set_blob(&header)?;
    job.set_target_value(session.target)?;
    Ok(job)
}
