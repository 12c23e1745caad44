//! # Command Processor (C6)
//!
//! The per-command pipeline: structural validation, limits enforcement,
//! idempotency lookup, dispatch to the storage engine, idempotency store,
//! and (for mutations) handing back the `Entry` that needs replicating.
//! Generalizes the teacher's `server.rs::handle_connection` match-based
//! dispatch into a transport-agnostic pure function: no socket I/O here,
//! callable equally from an MQTT subscription callback or a test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CoreError;
use crate::idempotency::IdempotencyCache;
use crate::metrics::Metrics;
use crate::model::{
    Command, Entry, KeyValueResult, OperationTag, PairResult, Response, ResponseResults, Status,
    MAX_BULK_PAYLOAD_BYTES, MAX_MGET_KEYS, MAX_MSET_PAIRS,
};
use crate::storage::StorageEngine;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// Validated and executes `Command`s against a `StorageEngine`, producing a
/// `Response` and, for successful mutations, the `Entry` that must be
/// handed to the replication pipeline (C7).
pub struct Processor {
    storage: StorageEngine,
    idempotency: IdempotencyCache,
    node_id: String,
    seq: AtomicU64,
    metrics: Metrics,
}

impl Processor {
    pub fn new(storage: StorageEngine, idempotency: IdempotencyCache, node_id: String) -> Self {
        let seq = storage.max_seq_for_node(&node_id) + 1;
        Self { storage, idempotency, node_id, seq: AtomicU64::new(seq), metrics: Metrics::new() }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    pub fn idempotency(&self) -> &IdempotencyCache {
        &self.idempotency
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Run the full pipeline for one command. Returns the `Response` to
    /// send back plus the `Entry`(ies) that must be replicated — empty for
    /// reads and for no-ops (cache hits, rejected commands).
    pub fn handle(&self, command: Command) -> (Response, Vec<Entry>) {
        Metrics::incr(&self.metrics.commands_total);

        let id = command.id().to_string();
        if !id.is_empty() {
            if let Some(cached) = self.idempotency.get(&id) {
                Metrics::incr(&self.metrics.idempotency_hits);
                return (cached, Vec::new());
            }
            Metrics::incr(&self.metrics.idempotency_misses);
        }

        let (response, entries) = match self.dispatch(&command) {
            Ok((response, entries)) => (response, entries),
            Err(err) => {
                match err.code() {
                    crate::error::ErrorCode::PayloadTooLarge => {
                        Metrics::incr(&self.metrics.commands_rejected_too_large)
                    }
                    _ => Metrics::incr(&self.metrics.commands_rejected_invalid),
                }
                (Response::error(&id, &err), Vec::new())
            }
        };

        if !id.is_empty() {
            self.idempotency.put(&id, response.clone());
        }
        (response, entries)
    }

    fn dispatch(&self, command: &Command) -> Result<(Response, Vec<Entry>), CoreError> {
        match command {
            Command::Get { id, key } => self.do_get(id, key),
            Command::Set { id, key, value } => self.do_set(id, key, value),
            Command::Del { id, key } => self.do_del(id, key),
            Command::Incr { id, key, amount } => self.do_incr_decr(id, key, amount.unwrap_or(1)),
            Command::Decr { id, key, amount } => {
                let amount = amount.unwrap_or(1);
                let negated = amount.checked_neg().ok_or(CoreError::RangeOverflow)?;
                self.do_incr_decr(id, key, negated)
            }
            Command::Append { id, key, value } => self.do_concat(id, key, value, true),
            Command::Prepend { id, key, value } => self.do_concat(id, key, value, false),
            Command::Mget { id, keys } => self.do_mget(id, keys),
            Command::Mset { id, key_values } => self.do_mset(id, key_values),
        }
    }

    fn do_get(&self, id: &str, key: &str) -> Result<(Response, Vec<Entry>), CoreError> {
        crate::model::validate_key(key)?;
        match self.storage.get(key) {
            Some(entry) => Ok((Response::ok_value(id, entry.value.unwrap_or_default()), Vec::new())),
            None => Ok((Response::not_found(id), Vec::new())),
        }
    }

    fn build_and_apply(
        &self,
        key: &str,
        value: String,
        op: OperationTag,
    ) -> Result<Entry, CoreError> {
        crate::model::validate_key(key)?;
        crate::model::validate_value(&value)?;
        let entry = Entry::new_value(key.to_string(), value, now_ms(), self.node_id.clone(), self.next_seq(), Some(op));
        self.storage.put(entry.clone(), &self.metrics)?;
        Ok(entry)
    }

    fn do_set(&self, id: &str, key: &str, value: &str) -> Result<(Response, Vec<Entry>), CoreError> {
        let entry = self.build_and_apply(key, value.to_string(), OperationTag::Set)?;
        Ok((Response::ok(id), vec![entry]))
    }

    fn do_del(&self, id: &str, key: &str) -> Result<(Response, Vec<Entry>), CoreError> {
        crate::model::validate_key(key)?;
        let entry = Entry::new_tombstone(key.to_string(), now_ms(), self.node_id.clone(), self.next_seq());
        self.storage.put(entry.clone(), &self.metrics)?;
        Ok((Response::ok(id), vec![entry]))
    }

    fn do_incr_decr(&self, id: &str, key: &str, amount: i64) -> Result<(Response, Vec<Entry>), CoreError> {
        crate::model::validate_key(key)?;
        let current: i64 = match self.storage.get(key) {
            None => 0,
            Some(entry) => {
                let raw = entry.value.unwrap_or_default();
                raw.parse().map_err(|_| CoreError::InvalidType)?
            }
        };
        let updated = current.checked_add(amount).ok_or(CoreError::RangeOverflow)?;
        let op = if amount >= 0 { OperationTag::Incr } else { OperationTag::Decr };
        let entry = self.build_and_apply(key, updated.to_string(), op)?;
        Ok((Response::ok_value(id, updated.to_string()), vec![entry]))
    }

    fn do_concat(&self, id: &str, key: &str, value: &str, append: bool) -> Result<(Response, Vec<Entry>), CoreError> {
        crate::model::validate_key(key)?;
        let current = self.storage.get(key).and_then(|e| e.value).unwrap_or_default();
        let combined = if append { format!("{current}{value}") } else { format!("{value}{current}") };
        let op = if append { OperationTag::Append } else { OperationTag::Prepend };
        let entry = self.build_and_apply(key, combined.clone(), op)?;
        Ok((Response::ok_value(id, combined), vec![entry]))
    }

    fn do_mget(&self, id: &str, keys: &[String]) -> Result<(Response, Vec<Entry>), CoreError> {
        if keys.len() > MAX_MGET_KEYS {
            return Err(CoreError::InvalidRequest(format!(
                "MGET accepts at most {MAX_MGET_KEYS} keys, got {}",
                keys.len()
            )));
        }
        for key in keys {
            crate::model::validate_key(key)?;
        }
        let results: Vec<KeyValueResult> = keys
            .iter()
            .map(|k| KeyValueResult { key: k.clone(), value: self.storage.get(k).and_then(|e| e.value) })
            .collect();
        Ok((
            Response {
                id: id.to_string(),
                status: Status::Ok,
                value: None,
                results: Some(ResponseResults::Gets(results)),
                error_code: None,
                message: None,
            },
            Vec::new(),
        ))
    }

    fn do_mset(&self, id: &str, key_values: &std::collections::HashMap<String, String>) -> Result<(Response, Vec<Entry>), CoreError> {
        if key_values.len() > MAX_MSET_PAIRS {
            return Err(CoreError::InvalidRequest(format!(
                "MSET accepts at most {MAX_MSET_PAIRS} pairs, got {}",
                key_values.len()
            )));
        }
        let total_bytes: usize = key_values.iter().map(|(k, v)| k.len() + v.len()).sum();
        if total_bytes > MAX_BULK_PAYLOAD_BYTES {
            return Err(CoreError::PayloadTooLarge(format!(
                "MSET bulk payload {total_bytes} bytes exceeds {MAX_BULK_PAYLOAD_BYTES}"
            )));
        }

        // Per-pair atomicity (§4.6): each pair is validated and applied
        // independently; one pair's failure does not block the others, and
        // each accepted pair produces its own replication event.
        let mut results = Vec::with_capacity(key_values.len());
        let mut entries = Vec::new();
        for (key, value) in key_values {
            match self.build_and_apply(key, value.clone(), OperationTag::Set) {
                Ok(entry) => {
                    entries.push(entry);
                    results.push(PairResult { key: key.clone(), status: Status::Ok, error_code: None });
                }
                Err(err) => {
                    results.push(PairResult { key: key.clone(), status: Status::Error, error_code: Some(err.code().as_u16()) });
                }
            }
        }
        Ok((
            Response {
                id: id.to_string(),
                status: Status::Ok,
                value: None,
                results: Some(ResponseResults::Sets(results)),
                error_code: None,
                message: None,
            },
            entries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Command;

    fn processor() -> Processor {
        Processor::new(StorageEngine::new(4), IdempotencyCache::default(), "node-a".into())
    }

    #[test]
    fn set_then_get_roundtrips() {
        let p = processor();
        let (resp, entry) = p.handle(Command::Set { id: "r1".into(), key: "k".into(), value: "v".into() });
        assert_eq!(resp.status, Status::Ok);
        assert!(!entry.is_empty());
        let (resp, _) = p.handle(Command::Get { id: "r2".into(), key: "k".into() });
        assert_eq!(resp.value, Some("v".into()));
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let p = processor();
        let (resp, entry) = p.handle(Command::Get { id: "r1".into(), key: "missing".into() });
        assert_eq!(resp.status, Status::NotFound);
        assert!(entry.is_empty());
    }

    #[test]
    fn idempotency_cache_hit_skips_storage_mutation() {
        let p = processor();
        let cmd = || Command::Set { id: "r1".into(), key: "k".into(), value: "v1".into() };
        let (first, entry1) = p.handle(cmd());
        assert!(!entry1.is_empty());
        let (second, entry2) = p.handle(cmd());
        assert_eq!(first, second);
        assert!(entry2.is_empty(), "cache hit must not re-trigger replication");
    }

    #[test]
    fn incr_default_amount_is_one_and_missing_key_is_zero() {
        let p = processor();
        let (resp, _) = p.handle(Command::Incr { id: "r1".into(), key: "counter".into(), amount: None });
        assert_eq!(resp.value, Some("1".into()));
    }

    #[test]
    fn incr_overflow_rejected_and_storage_unchanged() {
        let p = processor();
        p.handle(Command::Set { id: "r1".into(), key: "k".into(), value: i64::MAX.to_string() });
        let (resp, entry) = p.handle(Command::Incr { id: "r2".into(), key: "k".into(), amount: Some(1) });
        assert_eq!(resp.error_code, Some(crate::error::ErrorCode::RangeOverflow.as_u16()));
        assert!(entry.is_empty());
        assert_eq!(p.storage().get("k").unwrap().value, Some(i64::MAX.to_string()));
    }

    #[test]
    fn incr_on_non_numeric_value_is_invalid_type() {
        let p = processor();
        p.handle(Command::Set { id: "r1".into(), key: "k".into(), value: "not-a-number".into() });
        let (resp, _) = p.handle(Command::Incr { id: "r2".into(), key: "k".into(), amount: Some(1) });
        assert_eq!(resp.error_code, Some(crate::error::ErrorCode::InvalidType.as_u16()));
    }

    #[test]
    fn append_and_prepend_concatenate() {
        let p = processor();
        p.handle(Command::Set { id: "r1".into(), key: "k".into(), value: "b".into() });
        let (resp, _) = p.handle(Command::Append { id: "r2".into(), key: "k".into(), value: "c".into() });
        assert_eq!(resp.value, Some("bc".into()));
        let (resp, _) = p.handle(Command::Prepend { id: "r3".into(), key: "k".into(), value: "a".into() });
        assert_eq!(resp.value, Some("abc".into()));
    }

    #[test]
    fn mget_over_limit_is_invalid_request() {
        let p = processor();
        let keys: Vec<String> = (0..300).map(|i| format!("k{i}")).collect();
        let (resp, _) = p.handle(Command::Mget { id: "r1".into(), keys });
        assert_eq!(resp.error_code, Some(crate::error::ErrorCode::InvalidRequest.as_u16()));
    }

    #[test]
    fn mget_preserves_order_and_nulls_missing() {
        let p = processor();
        p.handle(Command::Set { id: "r1".into(), key: "a".into(), value: "1".into() });
        let (resp, _) = p.handle(Command::Mget { id: "r2".into(), keys: vec!["a".into(), "b".into()] });
        match resp.results {
            Some(ResponseResults::Gets(results)) => {
                assert_eq!(results[0], KeyValueResult { key: "a".into(), value: Some("1".into()) });
                assert_eq!(results[1], KeyValueResult { key: "b".into(), value: None });
            }
            _ => panic!("expected Gets results"),
        }
    }

    #[test]
    fn mset_over_pair_limit_is_invalid_request() {
        let p = processor();
        let kvs: std::collections::HashMap<String, String> = (0..200).map(|i| (format!("k{i}"), "v".into())).collect();
        let (resp, entry) = p.handle(Command::Mset { id: "r1".into(), key_values: kvs });
        assert_eq!(resp.error_code, Some(crate::error::ErrorCode::InvalidRequest.as_u16()));
        assert!(entry.is_empty());
    }

    #[test]
    fn mset_over_bulk_byte_cap_is_payload_too_large() {
        let p = processor();
        let big_value = "x".repeat(10_000);
        let kvs: std::collections::HashMap<String, String> = (0..100).map(|i| (format!("k{i}"), big_value.clone())).collect();
        let (resp, _) = p.handle(Command::Mset { id: "r1".into(), key_values: kvs });
        assert_eq!(resp.error_code, Some(crate::error::ErrorCode::PayloadTooLarge.as_u16()));
    }

    #[test]
    fn mset_applies_each_pair_independently() {
        let p = processor();
        let mut kvs = std::collections::HashMap::new();
        kvs.insert("a".to_string(), "1".to_string());
        kvs.insert("b".to_string(), "2".to_string());
        let (resp, _) = p.handle(Command::Mset { id: "r1".into(), key_values: kvs });
        match resp.results {
            Some(ResponseResults::Sets(results)) => assert_eq!(results.len(), 2),
            _ => panic!("expected Sets results"),
        }
        assert_eq!(p.storage().get("a").unwrap().value, Some("1".into()));
        assert_eq!(p.storage().get("b").unwrap().value, Some("2".into()));
    }

    #[test]
    fn del_produces_tombstone_and_subsequent_get_is_not_found() {
        let p = processor();
        p.handle(Command::Set { id: "r1".into(), key: "k".into(), value: "v".into() });
        let (resp, entry) = p.handle(Command::Del { id: "r2".into(), key: "k".into() });
        assert_eq!(resp.status, Status::Ok);
        assert!(entry[0].is_tombstone);
        let (resp, _) = p.handle(Command::Get { id: "r3".into(), key: "k".into() });
        assert_eq!(resp.status, Status::NotFound);
    }

    #[test]
    fn oversized_value_on_set_is_payload_too_large() {
        let p = processor();
        let big = "x".repeat(crate::model::MAX_VALUE_BYTES + 1);
        let (resp, entry) = p.handle(Command::Set { id: "r1".into(), key: "k".into(), value: big });
        assert_eq!(resp.error_code, Some(crate::error::ErrorCode::PayloadTooLarge.as_u16()));
        assert!(entry.is_empty());
    }
}
