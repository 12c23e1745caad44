//! # Broker Client (C3)
//!
//! Wraps `rumqttc::AsyncClient`/`EventLoop` (the teacher's MQTT dependency,
//! `replication.rs`) with an explicit connection state machine, exponential
//! backoff with jitter, and Last Will Testament handling — replacing the
//! teacher's stub `tokio::spawn` polling loop (`loop { eventloop.poll() }`
//! with a bare 5s retry sleep and a `TODO` for reconnection logic) with the
//! state machine and backoff policy §4.3 specifies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::watch;

use crate::config::Config;
use crate::metrics::Metrics;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const BACKOFF_MULTIPLIER: u32 = 2;
const BACKOFF_JITTER_FRACTION: f64 = 0.2;

/// Connection lifecycle states (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

fn status_topic(topic_prefix: &str, client_id: &str) -> String {
    if topic_prefix.is_empty() {
        format!("{client_id}/status")
    } else {
        format!("{topic_prefix}/{client_id}/status")
    }
}

/// Computes the next backoff delay in the exponential-with-jitter sequence
/// (§4.3: base 1s, ×2, cap 30s, ±20% jitter), given the previous delay.
/// Pass `None` for the first attempt. Public so callers embedding this
/// crate's reconnect policy elsewhere (and the property tests under
/// `tests/`) can exercise it directly.
pub fn next_backoff(previous: Option<Duration>) -> Duration {
    let base = match previous {
        None => BACKOFF_BASE,
        Some(prev) => (prev * BACKOFF_MULTIPLIER).min(BACKOFF_CAP),
    };
    let jitter_range = base.as_secs_f64() * BACKOFF_JITTER_FRACTION;
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let jittered = (base.as_secs_f64() + jitter).max(0.0);
    Duration::from_secs_f64(jittered)
}

/// MQTT broker client: connection state machine, QoS-1 pub/sub, and
/// reconnect backoff. Subscription delivery is exposed as an `mpsc` channel
/// of raw `(topic, payload)` pairs; `node.rs` routes them to the correlator
/// or processor by topic.
pub struct BrokerClient {
    client: AsyncClient,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    suppress_lwt: Arc<AtomicBool>,
    connection_timeout: Duration,
}

impl BrokerClient {
    /// Build the client and its paired event loop. The event loop must be
    /// driven by `run_event_loop` in a background task for publishes,
    /// subscriptions, and reconnection to make progress.
    pub fn new(config: &Config) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.mqtt_host, config.effective_mqtt_port());
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }
        let status_topic = status_topic(&config.topic_prefix, &config.client_id);
        options.set_last_will(LastWill::new(&status_topic, b"offline".to_vec(), QoS::AtLeastOnce, false));

        let (client, event_loop) = AsyncClient::new(options, 64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        (
            Self {
                client,
                state_tx,
                state_rx,
                suppress_lwt: Arc::new(AtomicBool::new(false)),
                connection_timeout: Duration::from_secs(config.connection_timeout_seconds),
            },
            event_loop,
        )
    }

    /// A watch receiver observing connection state transitions; multiple
    /// subscribers see only the latest value (§5 "broadcast, last-value").
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    async fn publish_bytes(&self, topic: &str, payload: Vec<u8>) -> Result<(), rumqttc::ClientError> {
        self.client.publish(topic, QoS::AtLeastOnce, false, payload).await
    }

    /// Publish a replication event or response payload. Always QoS 1,
    /// `retain` forced false (§4.3 "QoS contract").
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), rumqttc::ClientError> {
        self.publish_bytes(topic, payload).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), rumqttc::ClientError> {
        self.client.subscribe(topic, QoS::AtLeastOnce).await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), rumqttc::ClientError> {
        self.client.unsubscribe(topic).await
    }

    /// Gracefully disconnect. When `suppress_lwt` is true, the broker is
    /// asked for a clean session close and will not deliver the LWT.
    pub async fn disconnect(&self, suppress_lwt: bool) -> Result<(), rumqttc::ClientError> {
        self.suppress_lwt.store(suppress_lwt, Ordering::SeqCst);
        let _ = self.state_tx.send(ConnectionState::Disconnecting);
        self.client.disconnect().await?;
        let _ = self.state_tx.send(ConnectionState::Disconnected);
        Ok(())
    }

    /// Drive the event loop, updating connection state and feeding inbound
    /// publishes to `on_message`, until the process shuts down. Owns the
    /// reconnect backoff: on a connection error, sleeps for the current
    /// backoff delay (resetting to the base on every successful
    /// `Event::Incoming(Packet::ConnAck(_))`) before polling again —
    /// `rumqttc`'s own internal retry is bypassed by treating every
    /// `poll()` error as a transition to `Disconnected` that this loop
    /// paces itself, per §4.3's explicit backoff policy.
    pub async fn run_event_loop(
        &self,
        mut event_loop: EventLoop,
        metrics: Arc<Metrics>,
        mut on_message: impl FnMut(String, Vec<u8>) + Send,
    ) {
        let _ = self.state_tx.send(ConnectionState::Connecting);
        let mut backoff: Option<Duration> = None;

        loop {
            match tokio::time::timeout(self.connection_timeout, event_loop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    let _ = self.state_tx.send(ConnectionState::Connected);
                    backoff = None;
                    info!("broker connection established");
                }
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    on_message(publish.topic, publish.payload.to_vec());
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    self.handle_disconnect(&metrics);
                }
                Ok(Ok(_)) => {
                    // Other incoming/outgoing packets (SubAck, PubAck, PingResp,
                    // ...) don't change connection state.
                }
                Ok(Err(e)) => {
                    warn!("broker event loop error: {e}");
                    self.handle_disconnect(&metrics);
                    let delay = next_backoff(backoff);
                    backoff = Some(delay);
                    Metrics::incr(&metrics.broker_reconnects);
                    tokio::time::sleep(delay).await;
                }
                Err(_timeout_elapsed) => {
                    error!("broker connection timed out after {:?}", self.connection_timeout);
                    self.handle_disconnect(&metrics);
                    Metrics::incr(&metrics.broker_connect_failures);
                    let delay = next_backoff(backoff);
                    backoff = Some(delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn handle_disconnect(&self, metrics: &Metrics) {
        if self.current_state() == ConnectionState::Connected && !self.suppress_lwt.load(Ordering::SeqCst) {
            Metrics::incr(&metrics.broker_connect_failures);
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_backoff_is_base_plus_jitter_bounds() {
        let delay = next_backoff(None);
        assert!(delay >= Duration::from_millis(800) && delay <= Duration::from_millis(1200));
    }

    #[test]
    fn backoff_doubles_and_caps_at_thirty_seconds() {
        let mut delay = next_backoff(None);
        for _ in 0..10 {
            delay = next_backoff(Some(delay));
        }
        assert!(delay <= Duration::from_secs(36));
    }

    #[test]
    fn status_topic_respects_empty_prefix() {
        assert_eq!(status_topic("", "node-a"), "node-a/status");
        assert_eq!(status_topic("merkle_kv", "node-a"), "merkle_kv/node-a/status");
    }
}
