//! # Storage Engine (C1)
//!
//! LWW map with tombstones, per-origin deduplication, and GC. Generalizes the
//! teacher's `store/rwlock_engine.rs` (a single `RwLock<HashMap<String,
//! String>>`) into a sharded `Vec<RwLock<HashMap<String, Entry>>>` so that
//! per-key writes serialize independently, matching §5's "sharded locks keyed
//! by `hash(key)`" requirement for a linearizable per-key LWW sequence.

pub mod engine;

pub use engine::{AppliedDecision, StorageEngine};
