//! # Data Model
//!
//! `Entry` is shared by the storage engine (C1) and the replication codec
//! (C2): one struct plays both `StorageEntry` and `ReplicationEvent`, the way
//! the teacher's `ChangeEvent` (`change_event.rs`) is applied locally and
//! encoded on the wire without a separate conversion step. `Command` and
//! `Response` are tagged enums over `op`/`status`, replacing the teacher's
//! text protocol (`protocol::Command`) per the "dynamic typing in commands"
//! redesign note: unknown `op` values fail to parse instead of being
//! accepted and rejected later.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MAX_KEY_BYTES: usize = 256;
pub const MAX_VALUE_BYTES: usize = 256 * 1024;
pub const MAX_EVENT_BYTES: usize = 300 * 1024;
pub const MAX_MGET_KEYS: usize = 256;
pub const MAX_MSET_PAIRS: usize = 100;
pub const MAX_BULK_PAYLOAD_BYTES: usize = 512 * 1024;

/// The command class that produced an `Entry`, carried as advisory telemetry
/// (§9 Open Questions: "precise `operation_tag` values are only loosely used
/// in the source"; here it is purely observational, never read back to drive
/// LWW or dedup decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationTag {
    Set,
    Delete,
    Incr,
    Decr,
    Append,
    Prepend,
}

/// A single mutation, indexed by `key`. Doubles as the storage engine's
/// `StorageEntry` and the wire-level `ReplicationEvent` (§3, §6).
///
/// Field declaration order is also the canonical CBOR map key order used by
/// the codec (§4.2): it is already bytewise-sorted (`is_tombstone` < `key` <
/// `node_id` < `operation_tag` < `seq` < `timestamp_ms` < `value`), so the
/// codec can rely on `serde`'s struct-field order without a runtime sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    pub is_tombstone: bool,
    pub key: String,
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_tag: Option<OperationTag>,
    pub seq: u64,
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<String>,
}

impl Entry {
    pub fn new_value(
        key: String,
        value: String,
        timestamp_ms: u64,
        node_id: String,
        seq: u64,
        operation_tag: Option<OperationTag>,
    ) -> Self {
        Self {
            is_tombstone: false,
            key,
            node_id,
            operation_tag,
            seq,
            timestamp_ms,
            value: Some(value),
        }
    }

    pub fn new_tombstone(
        key: String,
        timestamp_ms: u64,
        node_id: String,
        seq: u64,
    ) -> Self {
        Self {
            is_tombstone: true,
            key,
            node_id,
            operation_tag: Some(OperationTag::Delete),
            seq,
            timestamp_ms,
            value: None,
        }
    }

    /// The `(timestamp_ms, node_id, seq)` tuple that totally orders entries
    /// for the same key under LWW (§4.1).
    pub fn lww_key(&self) -> (u64, &str, u64) {
        (self.timestamp_ms, self.node_id.as_str(), self.seq)
    }

    /// `true` if `self` strictly dominates `other` under LWW ordering (I4).
    /// A full tie (identical triple) does not dominate: it is a duplicate.
    pub fn dominates(&self, other: &Entry) -> bool {
        self.lww_key() > other.lww_key()
    }
}

/// Validate key/value sizes and UTF-8 well-formedness at the entry boundary
/// (I2, §4.1 "Size and encoding validation"). Keys and values are always
/// `String` in this crate so UTF-8 well-formedness is guaranteed by the type;
/// this function only checks length.
pub fn validate_key(key: &str) -> Result<(), crate::error::CoreError> {
    let len = key.len();
    if len == 0 || len > MAX_KEY_BYTES {
        return Err(crate::error::CoreError::PayloadTooLarge(format!(
            "key length {} bytes out of range 1..={}",
            len, MAX_KEY_BYTES
        )));
    }
    Ok(())
}

pub fn validate_value(value: &str) -> Result<(), crate::error::CoreError> {
    if value.len() > MAX_VALUE_BYTES {
        return Err(crate::error::CoreError::PayloadTooLarge(format!(
            "value length {} bytes exceeds {}",
            value.len(),
            MAX_VALUE_BYTES
        )));
    }
    Ok(())
}

/// Inbound request (§3 Command, §6 "Command/response wire format").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Command {
    #[serde(rename = "GET")]
    Get { id: String, key: String },
    #[serde(rename = "SET")]
    Set { id: String, key: String, value: String },
    #[serde(rename = "DEL")]
    Del { id: String, key: String },
    #[serde(rename = "INCR")]
    Incr {
        id: String,
        key: String,
        #[serde(default)]
        amount: Option<i64>,
    },
    #[serde(rename = "DECR")]
    Decr {
        id: String,
        key: String,
        #[serde(default)]
        amount: Option<i64>,
    },
    #[serde(rename = "APPEND")]
    Append { id: String, key: String, value: String },
    #[serde(rename = "PREPEND")]
    Prepend { id: String, key: String, value: String },
    #[serde(rename = "MGET")]
    Mget { id: String, keys: Vec<String> },
    #[serde(rename = "MSET")]
    Mset { id: String, key_values: HashMap<String, String> },
}

impl Command {
    pub fn id(&self) -> &str {
        match self {
            Command::Get { id, .. }
            | Command::Set { id, .. }
            | Command::Del { id, .. }
            | Command::Incr { id, .. }
            | Command::Decr { id, .. }
            | Command::Append { id, .. }
            | Command::Prepend { id, .. }
            | Command::Mget { id, .. }
            | Command::Mset { id, .. } => id,
        }
    }
}

/// Status returned in a `Response` (§3, §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "PAYLOAD_TOO_LARGE")]
    PayloadTooLarge,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

/// A single `{key, value}` pair in an `MGET` result, with `value: null` when
/// the key is absent or tombstoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueResult {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<String>,
}

/// Per-pair status for `MSET`, since atomicity is per-pair, not transactional
/// (§4.6 "Bulk ops").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairResult {
    pub key: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub results: Option<ResponseResults>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// The `results` field is polymorphic across `MGET` (list of key/value) and
/// `MSET` (list of per-pair status); tagging it keeps `Response` a single
/// concrete type instead of `serde_json::Value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseResults {
    Gets(Vec<KeyValueResult>),
    Sets(Vec<PairResult>),
}

impl Response {
    pub fn ok(id: impl Into<String>) -> Self {
        Self { id: id.into(), status: Status::Ok, value: None, results: None, error_code: None, message: None }
    }

    pub fn ok_value(id: impl Into<String>, value: String) -> Self {
        Self { id: id.into(), status: Status::Ok, value: Some(value), results: None, error_code: None, message: None }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self { id: id.into(), status: Status::NotFound, value: None, results: None, error_code: Some(crate::error::ErrorCode::NotFound.as_u16()), message: None }
    }

    pub fn error(id: impl Into<String>, err: &crate::error::CoreError) -> Self {
        let status = match err.code() {
            crate::error::ErrorCode::PayloadTooLarge => Status::PayloadTooLarge,
            crate::error::ErrorCode::NotFound => Status::NotFound,
            crate::error::ErrorCode::Timeout => Status::Timeout,
            _ => Status::Error,
        };
        Self {
            id: id.into(),
            status,
            value: None,
            results: None,
            error_code: Some(err.code().as_u16()),
            message: Some(err.to_string()),
        }
    }

    pub fn timeout(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Timeout,
            value: None,
            results: None,
            error_code: Some(crate::error::ErrorCode::Timeout.as_u16()),
            message: Some("operation timed out".to_string()),
        }
    }
}
