//! # Node
//!
//! The crate's entry point type: owns the storage engine, processor,
//! correlator, broker client, and the background tasks that keep them
//! running (broker event loop, tombstone GC sweep, idempotency cache
//! sweep). Mirrors the teacher's `tokio::spawn` usage in `server.rs`/
//! `replication.rs`, but with explicit `JoinHandle`s instead of
//! fire-and-forget spawns, so `shutdown()` can await clean termination
//! (§5 "node.rs owns one JoinHandle per long-running loop").

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broker::BrokerClient;
use crate::config::Config;
use crate::correlator::Correlator;
use crate::idempotency::IdempotencyCache;
use crate::metrics::Metrics;
use crate::model::{Command, Response};
use crate::persistence::{FileSink, NullSink, PersistenceSink};
use crate::processor::Processor;
use crate::replication;
use crate::storage::StorageEngine;
use crate::topic::TopicRouter;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

const GC_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const IDEMPOTENCY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A running replica: storage, processor, correlator, and broker wired
/// together, plus the background tasks that drive replication and garbage
/// collection.
pub struct Node {
    config: Config,
    processor: Arc<Processor>,
    correlator: Arc<Correlator>,
    broker: Arc<BrokerClient>,
    topics: TopicRouter,
    metrics: Arc<Metrics>,
    persistence: Arc<dyn PersistenceSink>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub fn new(config: Config) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<(String, Vec<u8>)>)> {
        config.validate()?;

        let storage = StorageEngine::new(config.shard_count);
        let idempotency = IdempotencyCache::new(
            config.idempotency_max_entries,
            Duration::from_secs(config.idempotency_ttl_seconds),
        );
        let processor = Arc::new(Processor::new(storage, idempotency, config.node_id.clone()));
        let correlator = Arc::new(Correlator::new());
        let topics = TopicRouter::new(config.topic_prefix.clone())?;
        let metrics = Arc::new(Metrics::new());

        let persistence: Arc<dyn PersistenceSink> = if config.persistence_enabled {
            let path = config
                .storage_path
                .as_ref()
                .expect("Config::validate guarantees storage_path is set when persistence_enabled");
            let file_sink = FileSink::open(std::path::Path::new(path))?;
            // Replay persisted state before accepting traffic, while we
            // still have the concrete type (and before it's erased into
            // the trait object every mutation appends through).
            for entry in file_sink.replay()? {
                processor.storage().apply_replication(entry, &metrics).ok();
            }
            Arc::new(file_sink)
        } else {
            Arc::new(NullSink)
        };

        let (broker, event_loop) = BrokerClient::new(&config);
        let broker = Arc::new(broker);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let event_loop_handle = {
            let broker = broker.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                broker
                    .run_event_loop(event_loop, metrics, move |topic, payload| {
                        let _ = inbound_tx.send((topic, payload));
                    })
                    .await;
            })
        };

        let node = Self {
            config,
            processor,
            correlator,
            broker,
            topics,
            metrics,
            persistence,
            tasks: vec![event_loop_handle],
        };
        Ok((node, inbound_rx))
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Start the periodic tombstone GC and idempotency cache sweeps. Called
    /// once after construction; handles are kept so `shutdown()` can join
    /// them.
    pub fn spawn_background_tasks(&mut self) {
        let processor = self.processor.clone();
        let metrics = self.metrics.clone();
        let retention_hours = self.config.tombstone_retention_hours;
        let gc_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                processor.storage().scan_tombstones_for_gc(now_ms(), retention_hours, &metrics);
            }
        });
        self.tasks.push(gc_handle);

        let processor = self.processor.clone();
        let idempotency_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDEMPOTENCY_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                processor.idempotency().sweep_expired();
            }
        });
        self.tasks.push(idempotency_handle);
    }

    /// Subscribe to the node's own command topic (other replicas addressing
    /// it directly), its own response topic (replies to commands it sent
    /// out), and the shared replication topic.
    pub async fn subscribe(&self) -> anyhow::Result<()> {
        self.broker.subscribe(&self.topics.command_topic(&self.config.client_id)?).await?;
        self.broker.subscribe(&self.topics.response_topic(&self.config.client_id)?).await?;
        self.broker.subscribe(&self.topics.replication_topic()).await?;
        Ok(())
    }

    /// Apply one payload received on the replication topic.
    pub fn apply_replication_payload(&self, payload: &[u8]) {
        replication::apply_inbound(self.processor.storage(), payload, self.config.skew_max_future_ms, &self.metrics);
    }

    /// Dispatch one `(topic, payload)` pair received from the broker event
    /// loop to the right handler: a replication event on the shared
    /// replication topic, a response on this node's own response topic, or
    /// a command on this node's own command topic.
    pub async fn route_inbound(&self, topic: &str, payload: Vec<u8>) {
        if topic == self.topics.replication_topic() {
            self.apply_replication_payload(&payload);
        } else if topic == self.topics.response_topic(&self.config.client_id).unwrap_or_default() {
            if let Ok(response) = serde_json::from_slice::<Response>(&payload) {
                self.resolve_response(response);
            }
        } else if topic == self.topics.command_topic(&self.config.client_id).unwrap_or_default() {
            if let Ok(command) = serde_json::from_slice::<Command>(&payload) {
                let response = self.handle_local_command(command).await;
                if let Ok(bytes) = serde_json::to_vec(&response) {
                    let reply_topic = self.topics.response_topic(&self.config.client_id).unwrap_or_default();
                    let _ = self.broker.publish(&reply_topic, bytes).await;
                }
            }
        }
    }

    /// Handle one locally-submitted command: run it through the processor
    /// and, for mutations, publish the resulting replication event(s).
    pub async fn handle_local_command(&self, command: Command) -> Response {
        let (response, entries) = self.processor.handle(command);
        for entry in &entries {
            let _ = self.persistence.append(entry);
            replication::publish_entry(&self.broker, &self.topics, entry, &self.metrics).await;
        }
        response
    }

    /// Send a command to a peer and await its response, or a synthesized
    /// timeout (C5). Registers the pending correlator entry *before*
    /// publishing, so a response delivered the instant the publish
    /// completes always finds a waiter (§4.5 ordering: "register a pending
    /// entry … then publish the command").
    pub async fn send_remote_command(&self, topic: &str, command: Command, payload: Vec<u8>, timeout: Duration) -> Response {
        let id = command.id().to_string();
        let rx = self.correlator.register(id.clone());
        if self.broker.publish(topic, payload).await.is_err() {
            self.correlator.cancel(&id);
            return Response::timeout(&id);
        }
        self.correlator.await_response(&id, rx, timeout).await
    }

    /// Fulfil a pending remote command from an inbound response payload.
    pub fn resolve_response(&self, response: Response) {
        let id = response.id.clone();
        self.correlator.fulfill(&id, response);
    }

    /// Stop all background tasks and disconnect cleanly, suppressing the
    /// Last Will Testament (graceful shutdown, not a crash).
    pub async fn shutdown(mut self) {
        info!("shutting down node {}", self.config.node_id);
        self.correlator.cancel_all_with_timeout();
        let _ = self.broker.disconnect(true).await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// `snapshot()`'s counters, formatted for logging or a STATS response.
pub fn metrics_log_line(metrics: &Metrics) -> String {
    metrics
        .snapshot()
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}
