//! MerkleKV binary: load configuration, construct a `Node`, and run it.
//!
//! The binary itself does no protocol work — it parses a config path,
//! builds the Tokio runtime, constructs the library's `Node`, and drains
//! the inbound broker channel into `Node::route_inbound` until interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use merkle_kv::config::Config;
use merkle_kv::node::Node;

/// A distributed key-value store for mobile edge devices, replicated over
/// a shared MQTT broker under Last-Writer-Wins semantics.
#[derive(Parser, Debug)]
#[command(name = "merkle_kv", version, about)]
struct Cli {
    /// Path to the node's configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let node_id = config.node_id.clone();
    let (mut node, mut inbound_rx) = Node::new(config)?;
    node.subscribe().await?;
    node.spawn_background_tasks();
    info!("node {node_id} started");

    loop {
        tokio::select! {
            inbound = inbound_rx.recv() => {
                match inbound {
                    Some((topic, payload)) => node.route_inbound(&topic, payload).await,
                    None => {
                        info!("inbound channel closed, shutting down node {node_id}");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down node {node_id}");
                break;
            }
        }
    }

    node.shutdown().await;
    Ok(())
}
