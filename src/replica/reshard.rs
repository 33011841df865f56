//! Live resharding
//!
//! Three phases driven by the replica that received the request:
//! harvest every shard's keys, make every replica rebuild its shard table
//! and wipe its store, then push each harvested key to a member of its new
//! shard. There is no rollback; a peer failing mid-way leaves the cluster
//! partially resharded and the error is returned to the caller.

use crate::common::{route_key, Error, ReshardClock, Result};
use crate::replica::node::Replica;
use crate::replica::protocol::{RehashRequest, Transfer};
use crate::replica::shard::{check_fault_tolerance, ShardTable};
use crate::replica::store::Entry;
use std::collections::HashMap;

/// Summary of a completed reshard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshardReport {
    pub shard_count: u64,
    pub harvested: usize,
    pub redistributed: usize,
}

impl Replica {
    /// Repartition the whole key space into `shard_count` shards.
    pub async fn reshard(&self, shard_count: u64) -> Result<ReshardReport> {
        let _guard = self
            .reshard_guard
            .try_lock()
            .map_err(|_| Error::ReshardInProgress)?;

        let (representatives, others) = {
            let state = self.state.read().await;
            check_fault_tolerance(shard_count, state.view.len())?;
            let representatives: Vec<String> = state
                .shards
                .shards()
                .iter()
                .filter_map(|s| s.members.first().cloned())
                .collect();
            (representatives, state.view.others())
        };
        tracing::info!(
            from = representatives.len(),
            to = shard_count,
            "Starting reshard"
        );

        let (entries, max_version) = self.harvest(&representatives).await?;
        let harvested = entries.len();

        let resume_version = match self.config.reshard_clock {
            ReshardClock::Reset => None,
            ReshardClock::Resume => Some(max_version),
        };
        let instruction = RehashRequest {
            shard_count,
            resume_version,
        };
        for peer in &others {
            self.peers.rehash(peer, &instruction).await?;
        }
        self.rebuild_and_wipe(shard_count, resume_version).await?;

        let redistributed = self.redistribute(entries, shard_count).await?;
        tracing::info!(
            shards = shard_count,
            harvested,
            redistributed,
            "Reshard complete"
        );
        Ok(ReshardReport {
            shard_count,
            harvested,
            redistributed,
        })
    }

    /// Rebuild the shard table over the current view and wipe the store.
    ///
    /// Runs entirely under the state lock, so no client write lands between
    /// the rebuild and the wipe.
    pub async fn rebuild_and_wipe(&self, shard_count: u64, resume_version: Option<u64>) -> Result<()> {
        let mut state = self.state.write().await;
        let table = ShardTable::build(&self.owner, shard_count, state.view.members())?;
        let clock = resume_version.unwrap_or(0);
        state.shards = table;
        state.store.wipe(clock);
        tracing::info!(
            shards = shard_count,
            shard = state.shards.self_shard_id(),
            clock,
            "Shard table rebuilt, store wiped"
        );
        Ok(())
    }

    /// Collect one member's key set per shard, keeping the newest entry per key.
    async fn harvest(&self, representatives: &[String]) -> Result<(Vec<Entry>, u64)> {
        let mut merged: HashMap<String, Entry> = HashMap::new();
        let mut max_version = 0;

        for (i, member) in representatives.iter().enumerate() {
            if i > 0 && !self.config.harvest_settle().is_zero() {
                tokio::time::sleep(self.config.harvest_settle()).await;
            }
            let transfer: Transfer = if *member == self.owner {
                self.snapshot().await
            } else {
                self.peers.fetch_entries(member, None).await?
            };
            tracing::debug!(
                member = %member,
                keys = transfer.entries.len(),
                "Harvested shard"
            );

            max_version = max_version.max(transfer.version);
            for entry in transfer.entries {
                max_version = max_version.max(entry.effective_version());
                match merged.get(&entry.key) {
                    Some(existing) if existing.effective_version() >= entry.effective_version() => {}
                    _ => {
                        merged.insert(entry.key.clone(), entry);
                    }
                }
            }
        }

        let mut entries: Vec<Entry> = merged.into_values().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok((entries, max_version))
    }

    /// Push every harvested entry to a random member of its new shard.
    async fn redistribute(&self, entries: Vec<Entry>, shard_count: u64) -> Result<usize> {
        let mut redistributed = 0;
        for entry in entries {
            let shard_id = route_key(&entry.key, shard_count);
            let target = {
                let state = self.state.read().await;
                if !state.shards.contains_shard(shard_id) {
                    tracing::warn!(key = %entry.key, shard = shard_id, "No such shard, key dropped");
                    continue;
                }
                state.shards.random_member_of(shard_id)?
            };
            if target == self.owner {
                self.fill(entry, true).await?;
            } else {
                self.peers.fill(&target, &entry, true).await?;
            }
            redistributed += 1;
        }
        Ok(redistributed)
    }
}

#[cfg(test)]
mod tests {
    use crate::common::Error;
    use crate::replica::node::tests::test_replica;
    use crate::replica::store::Entry;

    #[tokio::test]
    async fn test_rebuild_and_wipe() {
        let replica = test_replica("a:1", &["a:1", "b:1", "c:1", "d:1"], 1);
        let entry = Entry {
            key: "k".into(),
            value: "v".into(),
            version: 3,
            causal_history: vec![3],
        };
        replica.fill(entry, false).await.unwrap();

        replica.rebuild_and_wipe(2, None).await.unwrap();
        assert_eq!(replica.shard_ids().await, vec![1, 2]);
        assert_eq!(replica.self_shard_id().await, 1);
        assert!(replica.get("k").await.is_err());
        assert_eq!(replica.clock().await, 0);

        replica.rebuild_and_wipe(1, Some(12)).await.unwrap();
        assert_eq!(replica.clock().await, 12);
    }

    #[tokio::test]
    async fn test_rebuild_rejects_fault_tolerance_violation() {
        let replica = test_replica("a:1", &["a:1", "b:1", "c:1", "d:1"], 2);
        assert!(matches!(
            replica.rebuild_and_wipe(3, None).await,
            Err(Error::FaultTolerance { .. })
        ));
        // table untouched
        assert_eq!(replica.shard_ids().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reshard_precondition() {
        let replica = test_replica("a:1", &["a:1", "b:1", "c:1", "d:1"], 2);
        assert!(matches!(
            replica.reshard(3).await,
            Err(Error::FaultTolerance { members: 4, shards: 3 })
        ));
        assert!(matches!(
            replica.reshard(0).await,
            Err(Error::FaultTolerance { .. })
        ));
    }

    #[tokio::test]
    async fn test_one_reshard_at_a_time() {
        let replica = test_replica("a:1", &["a:1", "b:1", "c:1", "d:1"], 2);
        let _held = replica.reshard_guard.lock().await;
        assert!(matches!(
            replica.reshard(1).await,
            Err(Error::ReshardInProgress)
        ));
    }
}
