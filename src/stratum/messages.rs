//! Stratum message types and JSON-RPC serialization.
//!
//! This module defines the wire format for the Stratum dialect spoken by
//! Zcash pools. Messages are newline-delimited JSON-RPC 1.0 objects;
//! requests are serialized with serde, incoming lines are classified and
//! picked apart by hand for better error context than serde tuple structs.

use serde::Serialize;
use serde_json::Value;

use crate::job;

/// Events emitted by the Stratum client.
///
/// These events are sent via channel to the coordinator to notify about
/// protocol state changes and new work.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Subscribe handshake completed; the pool fixed this nonce prefix
    Subscribed {
        /// Pool-fixed high-order nonce bytes
        nonce_left: Vec<u8>,
    },

    /// Pool accepted our credentials
    Authorized,

    /// Share target changed (already reversed into internal order)
    TargetSet([u8; 32]),

    /// New work from `mining.notify` with `clean_jobs` set
    JobSet {
        /// Pool job identifier
        job_id: String,
        /// Assembled 108-byte header prefix
        header: Vec<u8>,
    },

    /// Pool accepted a submitted share
    ShareAccepted,

    /// Connection to the pool was lost
    Disconnected,
}

/// Commands sent to the Stratum client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Submit a share to the pool
    SubmitShare(SubmitParams),
}

/// Parameters for submitting a share, verbatim from a solver `sol:` line.
///
/// The four tokens are forwarded to `mining.submit` untouched; the worker
/// name is added by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitParams {
    /// Job the solution is for
    pub job_id: String,

    /// nTime used, 8 hex digits
    pub ntime: String,

    /// Solver-chosen right part of the nonce, hex
    pub nonce_rightpart: String,

    /// Encoded Equihash solution, hex
    pub sol: String,
}

/// An outgoing JSON-RPC request.
///
/// Serializes as `{"id":..,"method":..,"params":..}` followed by a
/// newline.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Monotonic request id
    pub id: u64,
    /// Method name
    pub method: String,
    /// Positional parameters
    pub params: Value,
}

impl Request {
    /// `mining.subscribe` with the fixed silentarmy user agent.
    pub fn subscribe(id: u64, host: &str, port: u16) -> Self {
        Self {
            id,
            method: "mining.subscribe".to_string(),
            params: serde_json::json!(["silentarmy", null, host, port.to_string()]),
        }
    }

    /// `mining.authorize`; the password parameter is sent only if present.
    pub fn authorize(id: u64, user: &str, pwd: Option<&str>) -> Self {
        let params = match pwd {
            Some(pwd) => serde_json::json!([user, pwd]),
            None => serde_json::json!([user]),
        };
        Self {
            id,
            method: "mining.authorize".to_string(),
            params,
        }
    }

    /// `mining.submit` with the four tokens from the solver, in order.
    pub fn submit(id: u64, user: &str, share: &SubmitParams) -> Self {
        Self {
            id,
            method: "mining.submit".to_string(),
            params: serde_json::json!([
                user,
                share.job_id,
                share.ntime,
                share.nonce_rightpart,
                share.sol
            ]),
        }
    }

    /// Serialize to one newline-terminated wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// One decoded message from the pool.
///
/// Classification is by key presence: a `result` key (even if null) makes
/// a Response, otherwise a `method` key makes a Notification. Anything
/// else is a protocol error.
#[derive(Debug, Clone, PartialEq)]
pub enum StratumMessage {
    /// Reply to one of our requests
    Response {
        /// Id echoed from the request (pools have been seen sending null)
        id: Option<u64>,
        /// Result value; may be Null
        result: Value,
        /// Error value; Null on success
        error: Value,
    },

    /// Server-initiated notification
    Notification {
        /// Id field if the pool sent one (usually null)
        id: Option<u64>,
        /// Method name
        method: String,
        /// Positional parameters
        params: Value,
    },
}

/// Decode one already-framed line into a [`StratumMessage`].
pub fn decode_message(line: &str) -> Result<StratumMessage, String> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| format!("bad JSON: {e}, line: {line}"))?;

    let obj = match value {
        Value::Object(obj) => obj,
        _ => return Err(format!("message not an object: {line}")),
    };

    let id = obj.get("id").and_then(Value::as_u64);

    if let Some(result) = obj.get("result") {
        return Ok(StratumMessage::Response {
            id,
            result: result.clone(),
            error: obj.get("error").cloned().unwrap_or(Value::Null),
        });
    }

    if let Some(method) = obj.get("method") {
        let method = method
            .as_str()
            .ok_or_else(|| format!("method not a string: {line}"))?;
        return Ok(StratumMessage::Notification {
            id,
            method: method.to_string(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        });
    }

    Err(format!("message has neither result nor method: {line}"))
}

/// A parsed `mining.notify`, header already assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyJob {
    /// Pool job identifier
    pub job_id: String,

    /// Assembled 108-byte header prefix
    pub header: Vec<u8>,

    /// Whether earlier jobs are invalidated
    pub clean_jobs: bool,
}

/// Parse and validate `mining.notify` params.
///
/// Field order: job_id, nVersion, hashPrevBlock, hashMerkleRoot,
/// hashReserved, nTime, nBits, clean_jobs. All hash fields are kept in
/// the byte order the pool supplied them.
pub fn parse_notify(params: &Value) -> Result<NotifyJob, String> {
    let arr = params
        .as_array()
        .ok_or("mining.notify params not an array")?;
    if arr.len() < 8 {
        return Err(format!("mining.notify params too short: {}", arr.len()));
    }

    let job_id = arr[0].as_str().ok_or("job_id not a string")?.to_string();

    let version_str = arr[1].as_str().ok_or("nVersion not a string")?;
    if version_str != "04000000" {
        return Err(format!("unsupported nVersion: {version_str}"));
    }
    let version = fixed_bytes::<4>(&arr[1], "nVersion")?;

    let prev_block = fixed_bytes::<32>(&arr[2], "hashPrevBlock")?;
    let merkle_root = fixed_bytes::<32>(&arr[3], "hashMerkleRoot")?;

    let reserved = fixed_bytes::<32>(&arr[4], "hashReserved")?;
    if reserved != [0u8; 32] {
        return Err("hashReserved not zero".to_string());
    }

    let ntime = fixed_bytes::<4>(&arr[5], "nTime")?;
    let nbits = fixed_bytes::<4>(&arr[6], "nBits")?;

    let clean_jobs = arr[7].as_bool().ok_or("clean_jobs not a bool")?;

    let header = job::assemble_header(&version, &prev_block, &merkle_root, &reserved, &ntime, &nbits);

    Ok(NotifyJob {
        job_id,
        header,
        clean_jobs,
    })
}

/// Parse `mining.set_target` params into internal (little-endian) order.
pub fn parse_set_target(params: &Value) -> Result<[u8; 32], String> {
    let arr = params
        .as_array()
        .ok_or("mining.set_target params not an array")?;
    let target_hex = arr
        .first()
        .and_then(Value::as_str)
        .ok_or("target not a string")?;
    job::decode_target(target_hex)
}

/// Decode a hex string into exactly N bytes.
fn fixed_bytes<const N: usize>(value: &Value, name: &str) -> Result<[u8; N], String> {
    let s = value.as_str().ok_or_else(|| format!("{name} not a string"))?;
    let bytes = hex::decode(s).map_err(|e| format!("{name} hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("{name} wrong length: {} bytes", b.len()))
}
