//! # Configuration Management
//!
//! Loads and validates the settings a node needs to reach its MQTT broker and
//! govern its replication behavior (§6 "Configuration"). Fields and defaults
//! come straight from spec §6; loading itself is unchanged from the
//! teacher's pattern: `config::Config::builder().add_source(File::from(path))`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

fn default_mqtt_use_tls() -> bool {
    false
}
fn default_topic_prefix() -> String {
    String::new()
}
fn default_keep_alive_seconds() -> u64 {
    60
}
fn default_session_expiry_seconds() -> u64 {
    86_400
}
fn default_skew_max_future_ms() -> u64 {
    300_000
}
fn default_tombstone_retention_hours() -> u64 {
    24
}
fn default_connection_timeout_seconds() -> u64 {
    20
}
fn default_persistence_enabled() -> bool {
    false
}
fn default_shard_count() -> usize {
    16
}
fn default_idempotency_max_entries() -> usize {
    1024
}
fn default_idempotency_ttl_seconds() -> u64 {
    600
}

/// Configuration for a single node (§6). Required: `mqtt_host`, `client_id`,
/// `node_id`; everything else defaults per the spec's "Optional with
/// defaults" list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt_host: String,
    pub client_id: String,
    pub node_id: String,

    /// `None` means "use the TLS-aware default" (1883, or 8883 when
    /// `mqtt_use_tls` is true) — resolved by `effective_mqtt_port` rather
    /// than baked in at deserialize time, since a plain per-field serde
    /// default has no visibility into the sibling `mqtt_use_tls` field.
    #[serde(default)]
    pub mqtt_port: Option<u16>,
    #[serde(default = "default_mqtt_use_tls")]
    pub mqtt_use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_session_expiry_seconds")]
    pub session_expiry_seconds: u64,
    #[serde(default = "default_skew_max_future_ms")]
    pub skew_max_future_ms: u64,
    #[serde(default = "default_tombstone_retention_hours")]
    pub tombstone_retention_hours: u64,
    #[serde(default = "default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_persistence_enabled")]
    pub persistence_enabled: bool,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_idempotency_max_entries")]
    pub idempotency_max_entries: usize,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mqtt_host must not be empty")]
    EmptyHost,
    #[error("client_id must not be empty")]
    EmptyClientId,
    #[error("node_id must not be empty")]
    EmptyNodeId,
    #[error("credentials supplied but mqtt_use_tls is false: TLS is mandatory when a username/password is set")]
    CredentialsRequireTls,
    #[error("persistence_enabled is true but storage_path is not set")]
    PersistenceMissingPath,
}

impl Config {
    /// The port to connect to: whatever was configured, or the TLS-aware
    /// default when the file left `mqtt_port` unset (§6: "1883, or 8883
    /// when `mqtt_use_tls`=true").
    pub fn effective_mqtt_port(&self) -> u16 {
        self.mqtt_port.unwrap_or(if self.mqtt_use_tls { 8883 } else { 1883 })
    }

    /// Load configuration from a TOML file, applying defaults for any
    /// field the file omits, then validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Enforce the invariants §6 "Security" calls out: TLS mandatory when
    /// credentials are present, and a persistence path when persistence is
    /// enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt_host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        if self.node_id.is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        if (self.username.is_some() || self.password.is_some()) && !self.mqtt_use_tls {
            return Err(ConfigError::CredentialsRequireTls);
        }
        if self.persistence_enabled && self.storage_path.is_none() {
            return Err(ConfigError::PersistenceMissingPath);
        }
        Ok(())
    }
}
