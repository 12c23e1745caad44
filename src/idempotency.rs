//! # Idempotency Cache (C6 support)
//!
//! Caches a materialized `Response` per request id so a replayed command
//! (same MQTT message redelivered under QoS 1, or a client retry after a
//! dropped response) is answered from cache instead of re-executed (§4.5,
//! I5). Built on `dashmap`, the same sharded-map crate backing the storage
//! engine's dedup table, with a side `VecDeque` tracking recency order (least
//! recently used at the front) for bounded-capacity LRU eviction, per §3/§4.6.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::Response;

pub const DEFAULT_MAX_ENTRIES: usize = 1024;
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct CachedResponse {
    response: Response,
    inserted_at: Instant,
}

/// Bounded, TTL-expiring cache keyed by a non-empty client-supplied request
/// id (`Command::id()`). Looking up an empty id is always a miss: an empty
/// id means the client opted out of idempotency (§4.5).
pub struct IdempotencyCache {
    entries: DashMap<String, CachedResponse>,
    order: Mutex<VecDeque<String>>,
    max_entries: usize,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_entries,
            ttl,
        }
    }

    /// Look up a previously cached response for `request_id`, evicting it
    /// first if it has aged past the TTL. A hit moves `request_id` to the
    /// back of the recency order (most-recently-used). Returns `None` for an
    /// empty id without touching the map.
    pub fn get(&self, request_id: &str) -> Option<Response> {
        if request_id.is_empty() {
            return None;
        }
        let expired = match self.entries.get(request_id) {
            Some(cached) => cached.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(request_id);
            self.order.lock().unwrap().retain(|k| k != request_id);
            return None;
        }
        let response = self.entries.get(request_id).map(|c| c.response.clone());
        if response.is_some() {
            self.touch(request_id);
        }
        response
    }

    /// Move `request_id` to the back of the recency order, marking it
    /// most-recently-used.
    fn touch(&self, request_id: &str) {
        let mut order = self.order.lock().unwrap();
        if let Some(pos) = order.iter().position(|k| k == request_id) {
            let key = order.remove(pos).unwrap();
            order.push_back(key);
        }
    }

    /// Record `response` under `request_id`, evicting the least-recently-used
    /// entry first if the cache is already at capacity. A no-op for an empty
    /// id.
    pub fn put(&self, request_id: &str, response: Response) {
        if request_id.is_empty() {
            return;
        }
        let is_new = !self.entries.contains_key(request_id);
        self.entries.insert(
            request_id.to_string(),
            CachedResponse { response, inserted_at: Instant::now() },
        );
        if is_new {
            let mut order = self.order.lock().unwrap();
            order.push_back(request_id.to_string());
            while order.len() > self.max_entries {
                if let Some(lru) = order.pop_front() {
                    self.entries.remove(&lru);
                }
            }
        } else {
            self.touch(request_id);
        }
    }

    /// Sweep every entry older than the configured TTL. Intended to run on
    /// a periodic background tick alongside the storage GC sweep.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now.duration_since(e.inserted_at) > self.ttl)
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }
        if count > 0 {
            let mut order = self.order.lock().unwrap();
            order.retain(|k| self.entries.contains_key(k));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}
