use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use dashmap::DashMap;

use crate::error::CoreError;
use crate::metrics::Metrics;
use crate::model::{validate_key, validate_value, Entry};

const DEFAULT_SHARD_COUNT: usize = 16;

/// Outcome of a `put`/`apply_replication` call, distinguishing the reasons a
/// write did not change state (§4.1 LWW total order, dedup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedDecision {
    /// The entry strictly dominated the prior one (or there was none) and is
    /// now stored (I4).
    Accepted,
    /// The `(node_id, seq)` pair was already observed; dropped before LWW
    /// comparison regardless of timestamp (§4.1 Deduplication).
    RejectedDuplicateSeq,
    /// The entry lost the LWW comparison against the current entry.
    RejectedStale,
    /// The entry was a full tie (identical `(timestamp_ms, node_id, seq)`)
    /// with the current entry; treated as a duplicate and rejected.
    RejectedDuplicateTie,
}

fn shard_index(key: &str, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count
}

/// Sharded, concurrent LWW map. Each shard is an independent `RwLock`, so two
/// unrelated keys never contend; within a shard, the lock makes the sequence
/// of LWW comparisons for any one key linearizable, which is the invariant
/// §5 requires of a multi-threaded runtime.
pub struct StorageEngine {
    shards: Vec<RwLock<HashMap<String, Entry>>>,
    shard_count: usize,
    /// `node_id -> highest observed seq`, used to drop replayed inbound
    /// events before they reach LWW comparison (§4.1 Deduplication). A
    /// `DashMap` fits this exactly: many independent origins, each wanting
    /// its own lock-free-ish slot (grounded in `stratadb-labs-strata-core`,
    /// which reaches for `dashmap` for its concurrent primitives).
    dedup: DashMap<String, u64>,
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SHARD_COUNT)
    }
}

impl StorageEngine {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self { shards, shard_count, dedup: DashMap::new() }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        &self.shards[shard_index(key, self.shard_count)]
    }

    /// Reads project tombstones to absence (§4.1).
    pub fn get(&self, key: &str) -> Option<Entry> {
        let shard = self.shard(key).read().unwrap();
        shard.get(key).filter(|e| !e.is_tombstone).cloned()
    }

    /// Raw lookup including tombstones, used internally by numeric/string
    /// ops in the command processor that must distinguish "never written"
    /// from "deleted".
    pub fn get_raw(&self, key: &str) -> Option<Entry> {
        let shard = self.shard(key).read().unwrap();
        shard.get(key).cloned()
    }

    /// Highest `seq` observed for `node_id` across all stored entries,
    /// regardless of shard. Used once at startup to seed the local seq
    /// counter (§4.6 "Deterministic origination": "on restart, the engine
    /// seeds `seq` from `max(seq for own node_id) + 1`").
    pub fn max_seq_for_node(&self, node_id: &str) -> u64 {
        let mut max = 0u64;
        for shard in &self.shards {
            let guard = shard.read().unwrap();
            for entry in guard.values() {
                if entry.node_id == node_id && entry.seq > max {
                    max = entry.seq;
                }
            }
        }
        max
    }

    /// Apply a locally-originated write. Validates UTF-8/size invariants at
    /// the boundary (I2, I5) before any LWW comparison; on acceptance,
    /// records the dedup entry so a later inbound replay of the same event
    /// is dropped (I3).
    pub fn put(&self, entry: Entry, metrics: &Metrics) -> Result<AppliedDecision, CoreError> {
        validate_key(&entry.key)?;
        if let Some(value) = &entry.value {
            validate_value(value)?;
        }
        Ok(self.apply(entry, metrics))
    }

    /// Apply an inbound replication event (§4.1, §4.7). Same validation and
    /// LWW/dedup rules as `put`; the only difference is the caller's intent
    /// (local mutation vs. remote apply), which this engine does not need to
    /// distinguish once validation has passed.
    pub fn apply_replication(&self, entry: Entry, metrics: &Metrics) -> Result<AppliedDecision, CoreError> {
        self.put(entry, metrics)
    }

    fn apply(&self, entry: Entry, metrics: &Metrics) -> AppliedDecision {
        // Dedup check happens before any LWW comparison, as §4.1 specifies:
        // "dropped ... regardless of timestamp". Different node_ids never
        // deduplicate against each other, so the table is keyed by node_id.
        let mut dedup_guard = self.dedup.entry(entry.node_id.clone()).or_insert(0);
        if entry.seq <= *dedup_guard {
            Metrics::incr(&metrics.storage_puts_rejected_duplicate);
            return AppliedDecision::RejectedDuplicateSeq;
        }
        let incoming_seq = entry.seq;

        let mut shard = self.shard(&entry.key).write().unwrap();
        let decision = match shard.get(&entry.key) {
            None => {
                shard.insert(entry.key.clone(), entry);
                AppliedDecision::Accepted
            }
            Some(current) => {
                if entry.dominates(current) {
                    shard.insert(entry.key.clone(), entry);
                    AppliedDecision::Accepted
                } else if entry.lww_key() == current.lww_key() {
                    AppliedDecision::RejectedDuplicateTie
                } else {
                    AppliedDecision::RejectedStale
                }
            }
        };
        drop(shard);

        match decision {
            AppliedDecision::Accepted => {
                *dedup_guard = incoming_seq;
                Metrics::incr(&metrics.storage_puts_accepted);
            }
            AppliedDecision::RejectedStale | AppliedDecision::RejectedDuplicateTie => {
                // Still seen-before-for-this-origin even though LWW rejected
                // it on content: record the seq so a later replay of this
                // exact (node_id, seq) is dropped at the dedup check above.
                *dedup_guard = incoming_seq;
                Metrics::incr(&metrics.storage_puts_rejected_stale);
            }
            AppliedDecision::RejectedDuplicateSeq => unreachable!("handled above"),
        }
        decision
    }

    /// Remove tombstones older than `tombstone_retention_hours` (I5). Callers
    /// drive this periodically (e.g. from a `tokio::time::interval` task in
    /// `node.rs`); the engine itself owns no background task.
    pub fn scan_tombstones_for_gc(&self, now_ms: u64, tombstone_retention_hours: u64, metrics: &Metrics) -> usize {
        let retention_ms = tombstone_retention_hours.saturating_mul(3_600_000);
        let mut collected = 0usize;
        for shard in &self.shards {
            let mut guard = shard.write().unwrap();
            let doomed: Vec<String> = guard
                .iter()
                .filter(|(_, e)| e.is_tombstone && now_ms.saturating_sub(e.timestamp_ms) >= retention_ms)
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                guard.remove(&key);
                collected += 1;
            }
        }
        if collected > 0 {
            for _ in 0..collected {
                Metrics::incr(&metrics.storage_tombstones_gced);
            }
        }
        collected
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationTag;

    fn entry(key: &str, value: &str, ts: u64, node: &str, seq: u64) -> Entry {
        Entry::new_value(key.into(), value.into(), ts, node.into(), seq, Some(OperationTag::Set))
    }

    #[test]
    fn lww_tiebreak_by_node_id() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine.apply_replication(entry("x", "a", 1000, "A", 1), &m).unwrap();
        engine.apply_replication(entry("x", "b", 1000, "B", 1), &m).unwrap();
        assert_eq!(engine.get("x").unwrap().value.unwrap(), "b");
    }

    #[test]
    fn tombstone_revival() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine.apply_replication(entry("y", "v1", 1000, "A", 1), &m).unwrap();
        engine
            .apply_replication(Entry::new_tombstone("y".into(), 2000, "A".into(), 2), &m)
            .unwrap();
        assert!(engine.get("y").is_none());
        engine.apply_replication(entry("y", "v2", 3000, "B", 1), &m).unwrap();
        assert_eq!(engine.get("y").unwrap().value.unwrap(), "v2");
    }

    #[test]
    fn dedup_drops_replayed_seq_regardless_of_timestamp() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine.apply_replication(entry("k", "v1", 1000, "A", 5), &m).unwrap();
        // Same (node, seq) replayed with a *later* timestamp must still drop.
        let decision = engine.apply_replication(entry("k", "v2", 9999, "A", 5), &m).unwrap();
        assert_eq!(decision, AppliedDecision::RejectedDuplicateSeq);
        assert_eq!(engine.get("k").unwrap().value.unwrap(), "v1");
    }

    #[test]
    fn different_origins_never_deduplicate_against_each_other() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine.apply_replication(entry("k", "a", 1000, "A", 1), &m).unwrap();
        let decision = engine.apply_replication(entry("k", "b", 2000, "B", 1), &m).unwrap();
        assert_eq!(decision, AppliedDecision::Accepted);
    }

    #[test]
    fn full_tie_is_rejected_as_duplicate() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine.apply_replication(entry("k", "a", 1000, "A", 1), &m).unwrap();
        let decision = engine.apply_replication(entry("k", "a", 1000, "A", 1), &m).unwrap();
        assert_eq!(decision, AppliedDecision::RejectedDuplicateTie);
    }

    #[test]
    fn oversized_key_rejected_before_any_state_change() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        let bad_key = "k".repeat(257);
        let err = engine.put(entry(&bad_key, "v", 1, "A", 1), &m).unwrap_err();
        assert!(matches!(err, CoreError::PayloadTooLarge(_)));
        assert!(engine.is_empty());
    }

    #[test]
    fn gc_removes_tombstones_past_retention() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine
            .apply_replication(Entry::new_tombstone("z".into(), 0, "A".into(), 1), &m)
            .unwrap();
        let now_ms = 25 * 3_600_000; // 25h later
        let removed = engine.scan_tombstones_for_gc(now_ms, 24, &m);
        assert_eq!(removed, 1);
    }

    #[test]
    fn gc_keeps_tombstones_within_retention() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine
            .apply_replication(Entry::new_tombstone("z".into(), 0, "A".into(), 1), &m)
            .unwrap();
        let now_ms = 1 * 3_600_000; // 1h later
        let removed = engine.scan_tombstones_for_gc(now_ms, 24, &m);
        assert_eq!(removed, 0);
    }

    #[test]
    fn max_seq_for_node_seeds_restart_counter() {
        let m = Metrics::new();
        let engine = StorageEngine::default();
        engine.apply_replication(entry("a", "1", 1, "self", 3), &m).unwrap();
        engine.apply_replication(entry("b", "2", 2, "self", 7), &m).unwrap();
        engine.apply_replication(entry("c", "3", 3, "other", 100), &m).unwrap();
        assert_eq!(engine.max_seq_for_node("self"), 7);
    }
}
