//! # Command Correlator (C5)
//!
//! Matches an outbound command to its eventual response. Grounded in the
//! teacher's `replication.rs::start_replication_handler`, which hands work
//! from a subscription callback to a waiting task over a channel; here the
//! channel is per-request (`oneshot`) rather than a single shared `mpsc`,
//! keyed by request id in a `DashMap` so an inbound response on the
//! subscription task can look up and fulfil the right waiter without a
//! central dispatch loop.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::model::Response;

/// Tracks commands awaiting a response, matched by request id.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<String, oneshot::Sender<Response>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self { pending: DashMap::new() }
    }

    /// Register `id` as awaiting a response, returning the receiving half
    /// of its `oneshot`. Split out from `wait_for` so a caller can register
    /// *before* publishing the command that will eventually trigger the
    /// response — publishing first would leave a window where a fast reply
    /// arrives before anything is pending to fulfil (§4.5 ordering: register
    /// before publish).
    pub fn register(&self, id: String) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Await a previously `register`ed receiver, resolving to a synthesized
    /// `TIMEOUT` response if `deadline` elapses first. The pending entry is
    /// removed whether the wait resolves, times out, or the caller drops the
    /// future (cancellation).
    pub async fn await_response(&self, id: &str, rx: oneshot::Receiver<Response>, deadline: Duration) -> Response {
        let result = match timeout(deadline, rx).await {
            // Responder fulfilled the oneshot.
            Ok(Ok(response)) => response,
            // Responder dropped its sender without sending (should not
            // happen in practice; treat as a lost response).
            Ok(Err(_)) => Response::timeout(id),
            // Deadline elapsed first.
            Err(_) => Response::timeout(id),
        };
        // Either path leaves a stale entry behind only if `fulfill` raced
        // us between `timeout` returning and here; remove defensively.
        self.pending.remove(id);
        result
    }

    /// Register and await in one call. Kept for callers (and tests) that
    /// have no publish step to interleave between the two.
    pub async fn wait_for(&self, id: String, deadline: Duration) -> Response {
        let rx = self.register(id.clone());
        self.await_response(&id, rx, deadline).await
    }

    /// Resolve the pending wait for `id` with `response`. A miss (no
    /// pending entry, or one already fulfilled/timed out/cancelled) is a
    /// silent no-op per §4.5's "idempotent arrival" rule: the oneshot send
    /// failing just means nobody is listening anymore.
    pub fn fulfill(&self, id: &str, response: Response) {
        if let Some((_, tx)) = self.pending.remove(id) {
            let _ = tx.send(response);
        }
    }

    /// Remove a pending wait without fulfilling it, e.g. when the broker
    /// disconnects and every in-flight correlator slot must be released.
    pub fn cancel(&self, id: &str) {
        self.pending.remove(id);
    }

    /// Cancel every pending wait, resolving each with a `TIMEOUT` response
    /// (§5 "A broker disconnect mid-request resolves all pending
    /// correlators with TIMEOUT").
    pub fn cancel_all_with_timeout(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Response::timeout(&id));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
