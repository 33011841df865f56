//! Membership view
//!
//! The ordered, duplicate-free list of replica addresses this replica knows
//! about, itself included. Order matters: every replica partitions the same
//! list into shards, so seeds keep their given order and additions append.

use crate::common::{Error, Result};
use rand::seq::SliceRandom;

#[derive(Debug, Clone)]
pub struct MembershipView {
    owner: String,
    members: Vec<String>,
}

impl MembershipView {
    /// Build the view as the deduplicated union of the seeds and `owner`.
    pub fn new(owner: impl Into<String>, seeds: &[String]) -> Self {
        let owner = owner.into();
        let mut members: Vec<String> = Vec::with_capacity(seeds.len() + 1);
        for addr in seeds {
            if !members.contains(addr) {
                members.push(addr.clone());
            }
        }
        if !members.contains(&owner) {
            members.push(owner.clone());
        }
        Self { owner, members }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.members.iter().any(|m| m == addr)
    }

    /// Every member except ourselves, in view order.
    pub fn others(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| **m != self.owner)
            .cloned()
            .collect()
    }

    /// Append a new member. The caller replicates the change.
    pub fn add(&mut self, addr: &str) -> Result<()> {
        if self.contains(addr) {
            return Err(Error::AlreadyPresent(addr.to_string()));
        }
        self.members.push(addr.to_string());
        Ok(())
    }

    /// Remove a member. The caller replicates the change.
    ///
    /// The owner always stays in its own view.
    pub fn remove(&mut self, addr: &str) -> Result<()> {
        if addr == self.owner {
            return Err(Error::Validation(format!(
                "A replica cannot remove itself from its view: {}",
                addr
            )));
        }
        let idx = self
            .members
            .iter()
            .position(|m| m == addr)
            .ok_or_else(|| Error::MemberNotFound(addr.to_string()))?;
        self.members.remove(idx);
        Ok(())
    }

    /// Pick a member other than ourselves uniformly at random.
    pub fn random_other(&self) -> Result<String> {
        let others = self.others();
        others
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::NoPeers(self.owner.clone()))
    }

    /// Comma separated form used on the wire.
    pub fn to_view_string(&self) -> String {
        self.members.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_dedups_and_includes_owner() {
        let view = MembershipView::new("c", &addrs(&["a", "b", "a"]));
        assert_eq!(view.members(), addrs(&["a", "b", "c"]).as_slice());

        let view = MembershipView::new("b", &addrs(&["a", "b", "c"]));
        assert_eq!(view.members(), addrs(&["a", "b", "c"]).as_slice());
        assert_eq!(view.owner(), "b");
    }

    #[test]
    fn test_add_remove() {
        let mut view = MembershipView::new("a", &addrs(&["a", "b"]));
        view.add("c").unwrap();
        assert_eq!(view.len(), 3);
        assert!(matches!(view.add("c"), Err(Error::AlreadyPresent(_))));

        view.remove("b").unwrap();
        assert_eq!(view.members(), addrs(&["a", "c"]).as_slice());
        assert!(matches!(view.remove("b"), Err(Error::MemberNotFound(_))));
    }

    #[test]
    fn test_owner_cannot_be_removed() {
        let mut view = MembershipView::new("a", &addrs(&["a", "b"]));
        assert!(matches!(view.remove("a"), Err(Error::Validation(_))));
        assert!(view.contains("a"));
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_random_other() {
        let view = MembershipView::new("a", &addrs(&["a", "b", "c"]));
        for _ in 0..50 {
            let picked = view.random_other().unwrap();
            assert_ne!(picked, "a");
            assert!(view.contains(&picked));
        }

        let alone = MembershipView::new("a", &[]);
        assert!(matches!(alone.random_other(), Err(Error::NoPeers(_))));
    }

    #[test]
    fn test_view_string() {
        let view = MembershipView::new("a", &addrs(&["a", "b"]));
        assert_eq!(view.to_view_string(), "a,b");
        assert_eq!(view.others(), addrs(&["b"]));
    }
}
