//! Replica server

use crate::common::{ReplicaConfig, Result};
use crate::replica::http::create_router;
use crate::replica::node::Replica;
use crate::replica::probe::{start_announcement, start_failure_probe};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ReplicaServer {
    config: ReplicaConfig,
}

impl ReplicaServer {
    pub fn new(config: ReplicaConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting replica: {}", self.config.socket_address);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  View: {}", self.config.view.join(","));
        match self.config.shard_count {
            Some(count) => tracing::info!("  Shards: {}", count),
            None => tracing::info!("  Shards: copied from a peer"),
        }
        tracing::info!("  Reshard clock: {:?}", self.config.reshard_clock);

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let replica = Replica::bootstrap(self.config).await?;
        run(replica, listener).await
    }
}

/// Start the background tasks and serve HTTP on `listener` until it fails.
pub async fn run(replica: Arc<Replica>, listener: TcpListener) -> Result<()> {
    if !replica.config().probe_interval().is_zero() {
        let _probe = start_failure_probe(replica.clone());
    }
    if replica.config().announce {
        let _announce = start_announcement(replica.clone());
    }

    let router = create_router(replica.clone());
    tracing::info!(
        "✓ Replica {} ready (shard {})",
        replica.owner(),
        replica.self_shard_id().await
    );

    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!("HTTP server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
