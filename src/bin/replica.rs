//! Replica binary

use clap::Parser;
use shardkv::common::config::DEFAULT_CONFIG_FILE;
use shardkv::common::{split_addresses, ReplicaConfig, ReshardClock};
use shardkv::ReplicaServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-replica")]
#[command(about = "shardkv replica: sharded, causally consistent key-value store")]
#[command(version)]
struct Cli {
    /// Config file (TOML); missing is fine
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// This replica's address as peers reach it ("ip:port")
    #[arg(long, env = "SOCKET_ADDRESS")]
    socket_address: Option<String>,

    /// Initial membership (comma-separated)
    #[arg(long, env = "VIEW")]
    view: Option<String>,

    /// Initial shard count; omit to copy the layout from a peer
    #[arg(long, env = "SHARD_COUNT")]
    shard_count: Option<u64>,

    /// Bind address for HTTP (defaults to 0.0.0.0 on the socket address port)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Clock policy after a reshard wipe
    #[arg(long, value_enum)]
    reshard_clock: Option<ReshardClock>,

    /// Do not announce this replica to a peer at startup
    #[arg(long)]
    no_announce: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
    let mut config = ReplicaConfig::load(&cli.config)?;
    if let Some(addr) = cli.socket_address {
        config.socket_address = addr;
    }
    if let Some(view) = cli.view {
        config.view = split_addresses(&view);
    }
    if cli.shard_count.is_some() {
        config.shard_count = cli.shard_count;
    }
    if let Some(policy) = cli.reshard_clock {
        config.reshard_clock = policy;
    }
    if cli.no_announce {
        config.announce = false;
    }
    match cli.bind {
        Some(bind) => config.bind_addr = bind,
        None if config.bind_addr == ReplicaConfig::default().bind_addr => {
            // Listen on the port peers were told about
            if let Ok(addr) = config.socket_address.parse::<SocketAddr>() {
                config.bind_addr.set_port(addr.port());
            }
        }
        None => {}
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    ReplicaServer::new(config).serve().await?;
    Ok(())
}
