//! Shard table
//!
//! Partitions the membership view into contiguous groups of at least two
//! replicas. Shard ids are 1-based and index [`ShardTable::shards`] at
//! `id - 1`. The table is rebuilt wholesale on reshard, never patched.

use crate::common::{route_key, Error, Result};
use rand::seq::SliceRandom;
use serde::Serialize;

/// Minimum replicas per shard.
pub const MIN_SHARD_SIZE: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct Shard {
    pub members: Vec<String>,
    /// Reporting only; never drives rebalancing.
    pub key_count: u64,
}

#[derive(Debug, Clone)]
pub struct ShardTable {
    self_shard_id: u64,
    shards: Vec<Shard>,
}

/// Check the fault-tolerance floor for `shard_count` shards over `members` replicas.
pub fn check_fault_tolerance(shard_count: u64, members: usize) -> Result<()> {
    if shard_count == 0 || (members as u64) / shard_count < MIN_SHARD_SIZE as u64 {
        return Err(Error::FaultTolerance {
            members,
            shards: shard_count,
        });
    }
    Ok(())
}

impl ShardTable {
    /// Split `members` into `shard_count` contiguous groups.
    ///
    /// Each group takes `members / shard_count` replicas in order; leftover
    /// replicas go one per shard starting from shard 1, so sizes differ by at
    /// most one. `owner` must be one of `members`.
    pub fn build(owner: &str, shard_count: u64, members: &[String]) -> Result<Self> {
        let table = Self::join(owner, shard_count, members)?;
        if table.self_shard_id == 0 {
            return Err(Error::Internal(format!(
                "{} is not part of the membership",
                owner
            )));
        }
        Ok(table)
    }

    /// Like [`ShardTable::build`], but `owner` may be missing from `members`.
    ///
    /// A replica joining late adopts a peer's layout and stays outside every
    /// shard (own shard id 0) until it is added to one.
    pub fn join(owner: &str, shard_count: u64, members: &[String]) -> Result<Self> {
        check_fault_tolerance(shard_count, members.len())?;

        let count = shard_count as usize;
        let base = members.len() / count;
        let mut shards: Vec<Shard> = members[..base * count]
            .chunks(base)
            .map(|chunk| Shard {
                members: chunk.to_vec(),
                key_count: 0,
            })
            .collect();

        for (i, addr) in members[base * count..].iter().enumerate() {
            shards[i].members.push(addr.clone());
        }

        let self_shard_id = shards
            .iter()
            .position(|s| s.members.iter().any(|m| m == owner))
            .map(|idx| idx as u64 + 1)
            .unwrap_or(0);

        Ok(Self {
            self_shard_id,
            shards,
        })
    }

    /// Our own shard id; 0 while we belong to no shard.
    pub fn self_shard_id(&self) -> u64 {
        self.self_shard_id
    }

    pub fn shard_count(&self) -> u64 {
        self.shards.len() as u64
    }

    pub fn shard_ids(&self) -> Vec<u64> {
        (1..=self.shard_count()).collect()
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn contains_shard(&self, shard_id: u64) -> bool {
        shard_id >= 1 && shard_id <= self.shard_count()
    }

    /// Shard owning `key` under the current shard count.
    pub fn route(&self, key: &str) -> u64 {
        route_key(key, self.shard_count())
    }

    fn shard(&self, shard_id: u64) -> Result<&Shard> {
        if !self.contains_shard(shard_id) {
            return Err(Error::UnknownShard(shard_id));
        }
        Ok(&self.shards[(shard_id - 1) as usize])
    }

    fn shard_mut(&mut self, shard_id: u64) -> Result<&mut Shard> {
        if !self.contains_shard(shard_id) {
            return Err(Error::UnknownShard(shard_id));
        }
        Ok(&mut self.shards[(shard_id - 1) as usize])
    }

    pub fn members_of(&self, shard_id: u64) -> Result<&[String]> {
        Ok(&self.shard(shard_id)?.members)
    }

    pub fn is_member(&self, shard_id: u64, addr: &str) -> bool {
        self.members_of(shard_id)
            .map(|members| members.iter().any(|m| m == addr))
            .unwrap_or(false)
    }

    /// Any member of the shard, ourselves included. No liveness filtering.
    pub fn random_member_of(&self, shard_id: u64) -> Result<String> {
        self.members_of(shard_id)?
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(Error::UnknownShard(shard_id))
    }

    pub fn key_count(&self, shard_id: u64) -> Result<u64> {
        Ok(self.shard(shard_id)?.key_count)
    }

    pub fn increment_key_count(&mut self, shard_id: u64) -> Result<()> {
        let shard = self.shard_mut(shard_id)?;
        shard.key_count += 1;
        Ok(())
    }

    pub fn decrement_key_count(&mut self, shard_id: u64) -> Result<()> {
        let shard = self.shard_mut(shard_id)?;
        shard.key_count = shard.key_count.saturating_sub(1);
        Ok(())
    }

    pub fn set_key_count(&mut self, shard_id: u64, count: u64) -> Result<()> {
        self.shard_mut(shard_id)?.key_count = count;
        Ok(())
    }

    /// Append `addr` to a shard. Moving `owner` also moves our own shard id.
    pub fn add_member(&mut self, shard_id: u64, addr: &str, owner: &str) -> Result<()> {
        if self.shards.iter().any(|s| s.members.iter().any(|m| m == addr)) {
            return Err(Error::AlreadyPresent(addr.to_string()));
        }
        self.shard_mut(shard_id)?.members.push(addr.to_string());
        if addr == owner {
            self.self_shard_id = shard_id;
        }
        Ok(())
    }

    /// Drop `addr` from whichever shard holds it; absent addresses are ignored.
    pub fn remove_member(&mut self, addr: &str) {
        for shard in &mut self.shards {
            shard.members.retain(|m| m != addr);
        }
    }
}
