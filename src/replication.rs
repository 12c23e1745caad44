//! # Replication Pipeline (C7)
//!
//! Glues the processor's local mutations to the broker (outbound) and the
//! broker's inbound replication messages to the storage engine, via the
//! codec (C2). Grounded in the teacher's `replication.rs::publish_set`/
//! `publish_delete` (construct a message, serialize, publish) and
//! `start_replication_handler` (decode, dispatch on operation, apply) — the
//! difference is canonical CBOR instead of ad hoc JSON, and an explicit
//! dedup/future-skew guard before `apply_replication` instead of the
//! teacher's bare `TODO`.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::broker::BrokerClient;
use crate::codec;
use crate::metrics::Metrics;
use crate::model::Entry;
use crate::storage::StorageEngine;
use crate::topic::TopicRouter;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

/// Encode `entry` and publish it on the replication topic. Called by
/// `node.rs` immediately after a local mutation's `apply` commits (§5
/// ordering guarantee (c): "A mutation's replication event is published
/// after its local apply commits").
pub async fn publish_entry(
    broker: &BrokerClient,
    topics: &TopicRouter,
    entry: &Entry,
    metrics: &Metrics,
) {
    match codec::encode(entry) {
        Ok(bytes) => {
            let topic = topics.replication_topic();
            if broker.publish(&topic, bytes).await.is_ok() {
                Metrics::incr(&metrics.replication_published_total);
            } else {
                Metrics::incr(&metrics.replication_publish_failed);
            }
        }
        Err(err) => {
            warn!("failed to encode outbound replication event for key {:?}: {err}", entry.key);
            Metrics::incr(&metrics.replication_codec_errors);
        }
    }
}

/// Decode and apply an inbound replication message. Codec failures are
/// logged and dropped (§7 "Codec failures on inbound events are logged and
/// dropped; they never terminate the pipeline"). Events too far in the
/// future are rejected before reaching the storage engine at all (§4.7
/// future-skew guard).
pub fn apply_inbound(
    storage: &StorageEngine,
    payload: &[u8],
    skew_max_future_ms: u64,
    metrics: &Metrics,
) {
    let entry = match codec::decode(payload) {
        Ok(entry) => entry,
        Err(err) => {
            warn!("dropping inbound replication event: failed to decode: {err}");
            Metrics::incr(&metrics.replication_codec_errors);
            return;
        }
    };

    let now = now_ms();
    if entry.timestamp_ms > now.saturating_add(skew_max_future_ms) {
        warn!(
            "rejecting inbound replication event for key {:?}: timestamp_ms {} exceeds now+skew ({} + {})",
            entry.key, entry.timestamp_ms, now, skew_max_future_ms
        );
        Metrics::incr(&metrics.replication_rejected_future_skew);
        return;
    }

    match storage.apply_replication(entry, metrics) {
        Ok(crate::storage::AppliedDecision::Accepted) => {
            Metrics::incr(&metrics.replication_applied_total);
        }
        Ok(crate::storage::AppliedDecision::RejectedDuplicateSeq) => {
            Metrics::incr(&metrics.replication_dropped_duplicate);
        }
        Ok(_) => {
            debug!("inbound replication event lost LWW comparison, discarding");
        }
        Err(err) => {
            warn!("inbound replication event failed validation: {err}");
            Metrics::incr(&metrics.replication_codec_errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationTag;

    #[test]
    fn future_skewed_event_is_rejected_before_storage_changes() {
        let storage = StorageEngine::default();
        let metrics = Metrics::new();
        let far_future = now_ms() + 10 * 60 * 1000;
        let entry = Entry::new_value("k".into(), "v".into(), far_future, "A".into(), 1, Some(OperationTag::Set));
        let bytes = codec::encode(&entry).unwrap();
        apply_inbound(&storage, &bytes, 300_000, &metrics);
        assert!(storage.get("k").is_none());
        assert_eq!(metrics.replication_rejected_future_skew.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn within_skew_event_is_applied() {
        let storage = StorageEngine::default();
        let metrics = Metrics::new();
        let entry = Entry::new_value("k".into(), "v".into(), now_ms(), "A".into(), 1, Some(OperationTag::Set));
        let bytes = codec::encode(&entry).unwrap();
        apply_inbound(&storage, &bytes, 300_000, &metrics);
        assert_eq!(storage.get("k").unwrap().value, Some("v".into()));
    }

    #[test]
    fn garbage_payload_is_dropped_without_panicking() {
        let storage = StorageEngine::default();
        let metrics = Metrics::new();
        apply_inbound(&storage, b"not cbor", 300_000, &metrics);
        assert!(storage.is_empty());
        assert_eq!(metrics.replication_codec_errors.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn duplicate_seq_increments_dropped_metric() {
        let storage = StorageEngine::default();
        let metrics = Metrics::new();
        let entry = Entry::new_value("k".into(), "v1".into(), now_ms(), "A".into(), 5, Some(OperationTag::Set));
        let bytes = codec::encode(&entry).unwrap();
        apply_inbound(&storage, &bytes, 300_000, &metrics);
        apply_inbound(&storage, &bytes, 300_000, &metrics);
        assert_eq!(metrics.replication_dropped_duplicate.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
