//! Replica state and the operations that do not replicate data
//!
//! The membership view, the shard table and the causal store live behind one
//! coarse `RwLock`. Mutations take the write lock; the lock is never held
//! across a peer call, so two replicas pushing to each other cannot deadlock.

use crate::common::{Error, ReplicaConfig, Result};
use crate::replica::peer_client::{PeerClient, ViewChange};
use crate::replica::protocol::{ShardInfo, Transfer};
use crate::replica::shard::ShardTable;
use crate::replica::store::{CausalStore, Entry};
use crate::replica::view::MembershipView;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Everything a replica mutates, guarded together.
#[derive(Debug)]
pub struct ReplicaState {
    pub view: MembershipView,
    pub shards: ShardTable,
    pub store: CausalStore,
}

/// Where a client key operation should be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// We are a member of the owning shard.
    Local { shard_id: u64 },
    /// Relay to this member of the owning shard.
    Remote { shard_id: u64, addr: String },
}

pub struct Replica {
    pub(crate) owner: String,
    pub(crate) config: ReplicaConfig,
    pub(crate) state: RwLock<ReplicaState>,
    pub(crate) peers: PeerClient,
    pub(crate) alive: RwLock<BTreeSet<String>>,
    pub(crate) reshard_guard: Mutex<()>,
}

impl Replica {
    /// Assemble a replica from an already built view and shard table.
    pub fn new(config: ReplicaConfig, view: MembershipView, shards: ShardTable) -> Self {
        let store = CausalStore::new(config.drain_pending, config.max_pending);
        Self {
            owner: view.owner().to_string(),
            config,
            state: RwLock::new(ReplicaState {
                view,
                shards,
                store,
            }),
            peers: PeerClient::new(),
            alive: RwLock::new(BTreeSet::new()),
            reshard_guard: Mutex::new(()),
        }
    }

    /// Build the replica described by `config`.
    ///
    /// With a shard count the table is built locally and a count that breaks
    /// the two-replica floor is fatal. Without one, the layout is copied from
    /// a random peer (late join).
    pub async fn bootstrap(config: ReplicaConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let owner = config.socket_address.clone();
        let mut view = MembershipView::new(owner.clone(), &config.view);

        let shards = match config.shard_count {
            Some(count) => ShardTable::build(&owner, count, view.members())?,
            None => {
                let peer = view.random_other()?;
                tracing::info!(peer = %peer, "No shard count configured, copying layout");
                let info = PeerClient::new().shard_info(&peer).await?;
                let peer_view = crate::common::split_addresses(&info.view);
                // Adopt the peer's member order so both partition the same list
                let mut seeds = peer_view.clone();
                seeds.extend(config.view.iter().cloned());
                view = MembershipView::new(owner.clone(), &seeds);
                // We stay outside every shard until added to one
                ShardTable::join(&owner, info.shard_count, &peer_view)?
            }
        };

        tracing::info!(
            owner = %owner,
            members = view.len(),
            shards = shards.shard_count(),
            shard = shards.self_shard_id(),
            "Replica initialized"
        );
        Ok(Arc::new(Self::new(config, view, shards)))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerClient {
        &self.peers
    }

    // === Reads ===

    pub async fn get(&self, key: &str) -> Result<Entry> {
        self.state.read().await.store.get(key)
    }

    pub async fn clock(&self) -> u64 {
        self.state.read().await.store.clock()
    }

    /// Full local key set and clock, as served to harvest and shard joins.
    pub async fn snapshot(&self) -> Transfer {
        let state = self.state.read().await;
        Transfer {
            entries: state.store.snapshot(),
            version: state.store.clock(),
        }
    }

    /// Decide who serves a client operation on `key`.
    pub async fn route_for(&self, key: &str) -> Result<Route> {
        let state = self.state.read().await;
        let shard_id = state.shards.route(key);
        if !state.shards.contains_shard(shard_id) {
            return Err(Error::UnknownShard(shard_id));
        }
        if state.shards.is_member(shard_id, &self.owner) {
            return Ok(Route::Local { shard_id });
        }
        let addr = state.shards.random_member_of(shard_id)?;
        Ok(Route::Remote { shard_id, addr })
    }

    // === Shard introspection ===

    pub async fn shard_info(&self) -> ShardInfo {
        let state = self.state.read().await;
        ShardInfo {
            shard_count: state.shards.shard_count(),
            view: state.view.to_view_string(),
        }
    }

    pub async fn shard_ids(&self) -> Vec<u64> {
        self.state.read().await.shards.shard_ids()
    }

    pub async fn self_shard_id(&self) -> u64 {
        self.state.read().await.shards.self_shard_id()
    }

    pub async fn shard_members(&self, shard_id: u64) -> Result<Vec<String>> {
        Ok(self.state.read().await.shards.members_of(shard_id)?.to_vec())
    }

    /// Our own counter for `shard_id`.
    pub async fn local_key_count(&self, shard_id: u64) -> Result<u64> {
        self.state.read().await.shards.key_count(shard_id)
    }

    /// Key count as reported by a random member of `shard_id`.
    pub async fn shard_key_count(&self, shard_id: u64) -> Result<u64> {
        let member = self.state.read().await.shards.random_member_of(shard_id)?;
        if member == self.owner {
            return self.local_key_count(shard_id).await;
        }
        self.peers.key_count(&member, shard_id).await
    }

    // === Membership ===

    pub async fn view_string(&self) -> String {
        self.state.read().await.view.to_view_string()
    }

    pub async fn alive_peers(&self) -> Vec<String> {
        self.alive.read().await.iter().cloned().collect()
    }

    /// Add a replica to the view and push the change to every other member.
    ///
    /// The new replica itself is not told; it brings its own view.
    pub async fn add_member(&self, addr: &str) -> Result<()> {
        let others = {
            let mut state = self.state.write().await;
            let others = state.view.others();
            state.view.add(addr)?;
            others
        };
        tracing::info!(member = %addr, "Replica added to view");
        for peer in others {
            self.peers
                .replicate_view(&peer, ViewChange::Add, addr)
                .await?;
        }
        Ok(())
    }

    /// Remove a replica from the view (and its shard) and push the change.
    pub async fn remove_member(&self, addr: &str) -> Result<()> {
        let others = {
            let mut state = self.state.write().await;
            state.view.remove(addr)?;
            state.shards.remove_member(addr);
            state.view.others()
        };
        tracing::info!(member = %addr, "Replica removed from view");
        for peer in others {
            self.peers
                .replicate_view(&peer, ViewChange::Remove, addr)
                .await?;
        }
        Ok(())
    }

    /// Apply a membership change pushed by a peer. Never re-forwarded, and
    /// repeating it is harmless.
    pub async fn apply_view_change(&self, change: ViewChange, addr: &str) {
        let mut state = self.state.write().await;
        let result = match change {
            ViewChange::Add => state.view.add(addr),
            ViewChange::Remove => {
                let removed = state.view.remove(addr);
                if removed.is_ok() {
                    state.shards.remove_member(addr);
                }
                removed
            }
        };
        if let Err(e) = result {
            tracing::debug!(member = %addr, "View change already applied: {}", e);
        }
    }

    /// Put `addr` into `shard_id` and push the change to every other member.
    ///
    /// When `addr` is this replica, it copies the shard's data first.
    pub async fn add_member_to_shard(&self, shard_id: u64, addr: &str) -> Result<()> {
        let others = {
            let mut state = self.state.write().await;
            state.shards.add_member(shard_id, addr, &self.owner)?;
            if !state.view.contains(addr) {
                state.view.add(addr)?;
            }
            state.view.others()
        };
        tracing::info!(member = %addr, shard = shard_id, "Replica added to shard");

        if addr == self.owner {
            self.copy_shard_data(shard_id).await?;
        }
        for peer in others {
            self.peers
                .replicate_shard_member(&peer, shard_id, addr)
                .await?;
        }
        Ok(())
    }

    /// Receiving side of [`Replica::add_member_to_shard`].
    pub async fn apply_shard_member(&self, shard_id: u64, addr: &str) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match state.shards.add_member(shard_id, addr, &self.owner) {
                Ok(()) => {}
                Err(Error::AlreadyPresent(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
            if !state.view.contains(addr) {
                state.view.add(addr)?;
            }
        }
        if addr == self.owner {
            self.copy_shard_data(shard_id).await?;
        }
        Ok(())
    }

    /// Copy the key set of another member of `shard_id` into our store.
    ///
    /// The only peer call with a bounded wait.
    async fn copy_shard_data(&self, shard_id: u64) -> Result<()> {
        let source = {
            let state = self.state.read().await;
            state
                .shards
                .members_of(shard_id)?
                .iter()
                .find(|m| **m != self.owner)
                .cloned()
        };
        let Some(source) = source else {
            tracing::warn!(shard = shard_id, "No other member to copy shard data from");
            return Ok(());
        };

        let transfer = self
            .peers
            .fetch_entries(&source, Some(self.config.bootstrap_timeout()))
            .await?;
        let copied = transfer.entries.len();

        let mut state = self.state.write().await;
        state.store.load(transfer.entries, transfer.version);
        let live = state.store.live_keys() as u64;
        state.shards.set_key_count(shard_id, live)?;
        tracing::info!(source = %source, shard = shard_id, keys = copied, "Copied shard data");
        Ok(())
    }
}
