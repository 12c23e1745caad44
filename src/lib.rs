//! # MerkleKV - Distributed Key-Value Store for Mobile Edge Devices
//!
//! MerkleKV replicates a key-value store across devices that only ever talk
//! to each other through a shared MQTT broker, under Last-Writer-Wins
//! conflict resolution. There is no peer-to-peer networking, no clustering
//! protocol, and no central coordinator: every device publishes its
//! mutations as replication events and applies whatever it receives from
//! everyone else.
//!
//! ## Architecture
//!
//! - **Storage Engine** (`storage`): sharded, in-memory map with LWW
//!   conflict resolution and per-origin dedup.
//! - **Data Model** (`model`): `Entry`, `Command`, `Response` — the shapes
//!   shared by storage, the wire codec, and the command pipeline.
//! - **Codec** (`codec`): canonical CBOR encoding for replication events.
//! - **Command Processor** (`processor`): validates and executes commands,
//!   producing the entries that need replicating.
//! - **Idempotency Cache** (`idempotency`): de-duplicates repeated client
//!   requests by request id.
//! - **Correlator** (`correlator`): matches outbound commands to inbound
//!   responses across the broker's async pub/sub.
//! - **Broker Client** (`broker`): MQTT connection lifecycle, backoff, LWT.
//! - **Topic Router** (`topic`): builds and validates this crate's topics.
//! - **Replication** (`replication`): glues local mutations to the broker
//!   and inbound broker messages back into storage.
//! - **Persistence** (`persistence`): optional write-through log + snapshot.
//! - **Node** (`node`): wires everything above into one running replica.
//!
//! See `config` for how a node is configured and `error` for the error
//! types threaded through the stack.

pub mod broker;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod idempotency;
pub mod metrics;
pub mod model;
pub mod node;
pub mod persistence;
pub mod processor;
pub mod replication;
pub mod storage;
pub mod topic;

pub use config::Config;
pub use error::CoreError;
pub use model::{Command, Entry, Response};
pub use node::Node;
