//! # Metrics / Observability (C8)
//!
//! Plain atomic counters consumed by every other component. Modeled after
//! the teacher's `ServerStats` (`server.rs`), generalized from per-command
//! counters to the replication/broker/idempotency counters this system needs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct Metrics {
    pub commands_total: AtomicU64,
    pub commands_rejected_invalid: AtomicU64,
    pub commands_rejected_too_large: AtomicU64,
    pub idempotency_hits: AtomicU64,
    pub idempotency_misses: AtomicU64,
    pub idempotency_evictions: AtomicU64,

    pub storage_puts_accepted: AtomicU64,
    pub storage_puts_rejected_duplicate: AtomicU64,
    pub storage_puts_rejected_stale: AtomicU64,
    pub storage_tombstones_gced: AtomicU64,

    pub replication_published_total: AtomicU64,
    pub replication_publish_failed: AtomicU64,
    pub replication_applied_total: AtomicU64,
    pub replication_dropped_duplicate: AtomicU64,
    pub replication_rejected_future_skew: AtomicU64,
    pub replication_codec_errors: AtomicU64,

    pub broker_reconnects: AtomicU64,
    pub broker_connect_failures: AtomicU64,

    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            commands_total: AtomicU64::new(0),
            commands_rejected_invalid: AtomicU64::new(0),
            commands_rejected_too_large: AtomicU64::new(0),
            idempotency_hits: AtomicU64::new(0),
            idempotency_misses: AtomicU64::new(0),
            idempotency_evictions: AtomicU64::new(0),
            storage_puts_accepted: AtomicU64::new(0),
            storage_puts_rejected_duplicate: AtomicU64::new(0),
            storage_puts_rejected_stale: AtomicU64::new(0),
            storage_tombstones_gced: AtomicU64::new(0),
            replication_published_total: AtomicU64::new(0),
            replication_publish_failed: AtomicU64::new(0),
            replication_applied_total: AtomicU64::new(0),
            replication_dropped_duplicate: AtomicU64::new(0),
            replication_rejected_future_skew: AtomicU64::new(0),
            replication_codec_errors: AtomicU64::new(0),
            broker_reconnects: AtomicU64::new(0),
            broker_connect_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot every counter as `(name, value)` pairs, for a STATS-style
    /// dump or an exporter to forward elsewhere.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("commands_total", self.commands_total.load(Ordering::Relaxed)),
            ("commands_rejected_invalid", self.commands_rejected_invalid.load(Ordering::Relaxed)),
            ("commands_rejected_too_large", self.commands_rejected_too_large.load(Ordering::Relaxed)),
            ("idempotency_hits", self.idempotency_hits.load(Ordering::Relaxed)),
            ("idempotency_misses", self.idempotency_misses.load(Ordering::Relaxed)),
            ("idempotency_evictions", self.idempotency_evictions.load(Ordering::Relaxed)),
            ("storage_puts_accepted", self.storage_puts_accepted.load(Ordering::Relaxed)),
            ("storage_puts_rejected_duplicate", self.storage_puts_rejected_duplicate.load(Ordering::Relaxed)),
            ("storage_puts_rejected_stale", self.storage_puts_rejected_stale.load(Ordering::Relaxed)),
            ("storage_tombstones_gced", self.storage_tombstones_gced.load(Ordering::Relaxed)),
            ("replication_published_total", self.replication_published_total.load(Ordering::Relaxed)),
            ("replication_publish_failed", self.replication_publish_failed.load(Ordering::Relaxed)),
            ("replication_applied_total", self.replication_applied_total.load(Ordering::Relaxed)),
            ("replication_dropped_duplicate", self.replication_dropped_duplicate.load(Ordering::Relaxed)),
            ("replication_rejected_future_skew", self.replication_rejected_future_skew.load(Ordering::Relaxed)),
            ("replication_codec_errors", self.replication_codec_errors.load(Ordering::Relaxed)),
            ("broker_reconnects", self.broker_reconnects.load(Ordering::Relaxed)),
            ("broker_connect_failures", self.broker_connect_failures.load(Ordering::Relaxed)),
            ("uptime_seconds", self.uptime_seconds()),
        ]
    }
}
