//! # Replication Codec (C2)
//!
//! Deterministic CBOR encode/decode for `Entry` as a `ReplicationEvent`
//! (§4.2). Built on `serde_cbor`, the teacher's wire-codec dependency
//! (`change_event.rs` encodes the same kind of struct via
//! `serde_cbor::to_vec`/`from_slice`).
//!
//! Determinism here rests on `Entry`'s field declaration order already being
//! the canonical bytewise-sorted key order (see `model.rs`), combined with
//! `serde_cbor`'s definite-length, shortest-form integer encoding and its
//! `skip_serializing_if` support for omitting absent optionals. `is_tombstone`
//! is a plain `bool` field (never `Option`), so it is always present, as §4.2
//! requires.

use crate::error::CoreError;
use crate::model::{Entry, MAX_EVENT_BYTES};

/// Encode an `Entry` to canonical CBOR bytes, rejecting payloads over the
/// 300 KiB hard limit (§3, §4.2).
pub fn encode(entry: &Entry) -> Result<Vec<u8>, CoreError> {
    let bytes = serde_cbor::to_vec(entry).map_err(|e| CoreError::CborEncode(e.to_string()))?;
    if bytes.len() > MAX_EVENT_BYTES {
        return Err(CoreError::CborPayloadTooLarge { actual: bytes.len(), limit: MAX_EVENT_BYTES });
    }
    Ok(bytes)
}

/// Decode canonical CBOR bytes back into an `Entry`. Rejects payloads over
/// the size cap before attempting to parse them (cheap first line of
/// defense against a hostile arbitrarily-long buffer), and rejects anything
/// that doesn't deserialize into the exact `Entry` shape (unknown fields,
/// duplicate keys, or a missing required field all surface as
/// `CborDecode`).
pub fn decode(bytes: &[u8]) -> Result<Entry, CoreError> {
    if bytes.len() > MAX_EVENT_BYTES {
        return Err(CoreError::CborPayloadTooLarge { actual: bytes.len(), limit: MAX_EVENT_BYTES });
    }
    serde_cbor::from_slice(bytes).map_err(|e| CoreError::CborDecode(e.to_string()))
}
