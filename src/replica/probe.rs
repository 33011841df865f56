//! Background tasks: failure probe and startup announcement
//!
//! Both run detached for the life of the process. Neither changes the
//! membership view; the probe only maintains the alive set that operators can
//! read back.

use crate::replica::node::Replica;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Periodically probe every other member and keep the alive set current.
pub fn start_failure_probe(replica: Arc<Replica>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(replica.config().probe_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            probe_once(&replica).await;
        }
    })
}

/// One probe round. Returns the members that answered.
pub async fn probe_once(replica: &Replica) -> BTreeSet<String> {
    let others = replica.state.read().await.view.others();
    let timeout = replica.config().probe_timeout();

    let mut alive = BTreeSet::new();
    for peer in others {
        if replica.peers().probe(&peer, timeout).await {
            alive.insert(peer);
        }
    }

    let mut current = replica.alive.write().await;
    for peer in alive.difference(&current) {
        tracing::info!(peer = %peer, "Peer is up");
    }
    for peer in current.difference(&alive) {
        tracing::warn!(peer = %peer, "Peer is not responding");
    }
    *current = alive.clone();
    alive
}

/// Tell a random other member that we exist. Failures are only logged.
pub fn start_announcement(replica: Arc<Replica>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let peer = match replica.state.read().await.view.random_other() {
            Ok(peer) => peer,
            Err(e) => {
                tracing::debug!("Nobody to announce to: {}", e);
                return;
            }
        };
        match replica.peers().announce(&peer, replica.owner()).await {
            Ok(()) => tracing::info!(peer = %peer, "Announced to peer"),
            Err(e) => tracing::warn!(peer = %peer, "Announcement failed: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::node::tests::test_replica;

    #[tokio::test]
    async fn test_probe_marks_unreachable_peers_down() {
        let replica = test_replica("127.0.0.1:1", &["127.0.0.1:1", "127.0.0.1:9"], 1);
        replica.alive.write().await.insert("127.0.0.1:9".to_string());

        let alive = probe_once(&replica).await;
        assert!(alive.is_empty());
        assert!(replica.alive_peers().await.is_empty());
    }
}
