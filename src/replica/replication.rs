//! Write paths and replication fan-out
//!
//! A write accepted from a client is applied locally under the state lock,
//! then pushed one hop: the full entry to every other member of the owning
//! shard, and the bare version to every replica outside it. Writes received
//! from peers are applied and never re-forwarded.

use crate::common::Result;
use crate::replica::node::{Replica, ReplicaState};
use crate::replica::peer_client::PeerApply;
use crate::replica::store::{Admission, AppliedWrite, Entry, Origin, WriteKind};

/// Result of a client put, as reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub version: u64,
    pub causal_history: Vec<u64>,
    /// The key held a value before this put.
    pub replaced: bool,
    pub shard_id: u64,
}

/// Result of a client delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub version: u64,
    pub causal_history: Vec<u64>,
}

/// One accepted client write and the replicas it must reach.
#[derive(Debug, Clone)]
struct FanOut {
    kind: WriteKind,
    entry: Entry,
    shard_peers: Vec<String>,
    outside: Vec<String>,
}

impl Replica {
    /// Client put on a key owned by our shard.
    pub async fn put(&self, key: &str, value: Option<&str>, history: &[u64]) -> Result<PutOutcome> {
        let (outcome, plans) = {
            let mut state = self.state.write().await;
            let admission = state.store.put(key, value, history)?;
            let outcome = PutOutcome {
                version: admission.write.version,
                causal_history: admission.write.causal_history.clone(),
                replaced: admission.write.was_live,
                shard_id: state.shards.route(key),
            };
            let plans = self.record_applied(&mut state, &admission);
            (outcome, plans)
        };

        tracing::info!(key = %key, version = outcome.version, "Put accepted");
        self.fan_out(plans).await?;
        Ok(outcome)
    }

    /// Client delete on a key owned by our shard.
    pub async fn delete(&self, key: &str, history: &[u64]) -> Result<DeleteOutcome> {
        let (outcome, plans) = {
            let mut state = self.state.write().await;
            let admission = state.store.delete(key, history)?;
            let outcome = DeleteOutcome {
                version: admission.write.version,
                causal_history: admission.write.causal_history.clone(),
            };
            let plans = self.record_applied(&mut state, &admission);
            (outcome, plans)
        };

        tracing::info!(key = %key, version = outcome.version, "Delete accepted");
        self.fan_out(plans).await?;
        Ok(outcome)
    }

    /// Apply a write pushed by the shard member that accepted it.
    ///
    /// Returns the version now applied. Only drained client writes fan out.
    pub async fn apply_forwarded(&self, kind: WriteKind, entry: Entry) -> Result<u64> {
        let key = entry.key.clone();
        let (version, plans) = {
            let mut state = self.state.write().await;
            let admission = state.store.apply_forwarded(kind, entry)?;
            let plans = self.record_applied(&mut state, &admission);
            (admission.write.version, plans)
        };

        tracing::debug!(key = %key, version, "Applied forwarded write");
        self.fan_out(plans).await?;
        Ok(version)
    }

    /// Advance the clock on behalf of a write accepted in another shard.
    pub async fn clock_update(&self, version: u64) -> Result<u64> {
        let plans = {
            let mut state = self.state.write().await;
            let admission = state.store.clock_update(version)?;
            self.record_applied(&mut state, &admission)
        };
        self.fan_out(plans).await?;
        Ok(version)
    }

    /// Install an entry unconditionally.
    ///
    /// With `replicate` the entry is also installed on every other member of
    /// our shard.
    pub async fn fill(&self, entry: Entry, replicate: bool) -> Result<()> {
        let shard_peers = {
            let mut state = self.state.write().await;
            let shard_id = state.shards.route(&entry.key);
            if state.store.fill(entry.clone()) && state.shards.contains_shard(shard_id) {
                state.shards.increment_key_count(shard_id)?;
            }
            if replicate {
                peers_in_own_shard(&state, &self.owner)
            } else {
                Vec::new()
            }
        };

        tracing::debug!(key = %entry.key, version = entry.version, "Filled entry");
        for peer in shard_peers {
            self.peers.fill(&peer, &entry, false).await?;
        }
        Ok(())
    }

    /// Update key counters for everything an admission applied and collect
    /// the fan-out owed for client writes among them.
    fn record_applied(&self, state: &mut ReplicaState, admission: &Admission) -> Vec<FanOut> {
        if !admission.fresh {
            return Vec::new();
        }

        let mut plans = Vec::new();
        for write in std::iter::once(&admission.write).chain(admission.drained.iter()) {
            update_key_count(state, write);
            if write.origin != Origin::Client {
                continue;
            }
            if let (Some(kind), Some(entry)) = (write.kind(), write.to_entry()) {
                let shard_peers = peers_in_own_shard(state, &self.owner);
                let outside = state
                    .view
                    .others()
                    .into_iter()
                    .filter(|m| !shard_peers.contains(m))
                    .collect();
                plans.push(FanOut {
                    kind,
                    entry,
                    shard_peers,
                    outside,
                });
            }
        }
        plans
    }

    /// Push accepted writes to their replicas, sequentially.
    ///
    /// A stalled peer is logged and left to catch up; a transport failure
    /// aborts the remaining pushes and fails the request.
    async fn fan_out(&self, plans: Vec<FanOut>) -> Result<()> {
        for plan in plans {
            let version = plan.entry.version;
            for peer in &plan.shard_peers {
                if self.peers.replicate_write(peer, plan.kind, &plan.entry).await?
                    == PeerApply::Stalled
                {
                    tracing::warn!(peer = %peer, key = %plan.entry.key, version, "Shard peer stalled");
                }
            }
            for peer in &plan.outside {
                if self.peers.clock_update(peer, version).await? == PeerApply::Stalled {
                    tracing::warn!(peer = %peer, version, "Clock update stalled");
                }
            }
        }
        Ok(())
    }
}

/// Other members of our own shard.
fn peers_in_own_shard(state: &ReplicaState, owner: &str) -> Vec<String> {
    state
        .shards
        .members_of(state.shards.self_shard_id())
        .map(|members| members.iter().filter(|m| *m != owner).cloned().collect())
        .unwrap_or_default()
}

fn update_key_count(state: &mut ReplicaState, write: &AppliedWrite) {
    let Some(key) = write.mutation.key() else {
        return;
    };
    let shard_id = state.shards.route(key);
    let result = match write.kind() {
        Some(WriteKind::Put) if !write.was_live => state.shards.increment_key_count(shard_id),
        Some(WriteKind::Delete) if write.was_live => state.shards.decrement_key_count(shard_id),
        _ => Ok(()),
    };
    if let Err(e) = result {
        tracing::debug!(key = %key, "Key count not tracked: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use crate::common::Error;
    use crate::replica::node::tests::test_replica;
    use crate::replica::node::Replica;
    use crate::replica::peer_client::ViewChange;
    use crate::replica::store::{Entry, WriteKind};

    /// A replica left alone in its view and shard, so fan-out has no targets.
    async fn solo() -> Replica {
        let replica = test_replica("a:1", &["a:1", "b:1"], 1);
        replica.apply_view_change(ViewChange::Remove, "b:1").await;
        replica
    }

    #[tokio::test]
    async fn test_put_then_update() {
        let replica = solo().await;
        let first = replica.put("a", Some("1"), &[]).await.unwrap();
        assert_eq!(first.version, 1);
        assert!(!first.replaced);
        assert_eq!(first.shard_id, 1);

        let second = replica
            .put("a", Some("2"), &first.causal_history)
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert!(second.replaced);
        assert_eq!(second.causal_history, vec![1, 2]);
        assert_eq!(replica.local_key_count(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_updates_key_count() {
        let replica = solo().await;
        replica.put("a", Some("1"), &[]).await.unwrap();
        replica.put("b", Some("1"), &[]).await.unwrap();
        let deleted = replica.delete("a", &[]).await.unwrap();
        assert_eq!(deleted.version, 3);
        assert_eq!(deleted.causal_history, vec![1, 3]);
        assert_eq!(replica.local_key_count(1).await.unwrap(), 1);
        assert!(matches!(
            replica.delete("a", &[]).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_put_leaves_state_alone() {
        let replica = solo().await;
        assert!(matches!(
            replica.put("a", Some("1"), &[5]).await,
            Err(Error::CausalityStall { version: 6, clock: 0 })
        ));
        assert_eq!(replica.clock().await, 0);
        assert_eq!(replica.local_key_count(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forwarded_and_clock_update() {
        let replica = solo().await;
        let entry = Entry {
            key: "k".into(),
            value: "v".into(),
            version: 1,
            causal_history: vec![1],
        };
        assert_eq!(
            replica.apply_forwarded(WriteKind::Put, entry).await.unwrap(),
            1
        );
        assert_eq!(replica.clock_update(2).await.unwrap(), 2);
        assert!(matches!(
            replica.clock_update(4).await,
            Err(Error::CausalityStall { version: 4, clock: 2 })
        ));
        assert_eq!(replica.clock().await, 2);
        assert_eq!(replica.get("k").await.unwrap().value, "v");
    }

    #[tokio::test]
    async fn test_fill_is_unconditional() {
        let replica = solo().await;
        let entry = Entry {
            key: "k".into(),
            value: "v".into(),
            version: 9,
            causal_history: vec![3, 9],
        };
        replica.fill(entry.clone(), true).await.unwrap();
        replica.fill(entry, true).await.unwrap();
        assert_eq!(replica.get("k").await.unwrap().version, 9);
        assert_eq!(replica.clock().await, 0);
        assert_eq!(replica.local_key_count(1).await.unwrap(), 1);
    }
}
