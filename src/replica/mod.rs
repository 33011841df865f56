//! Replica implementation
//!
//! A replica is responsible for:
//! - Membership view and shard table
//! - Causal admission of writes against a store-wide logical clock
//! - One-hop replication of accepted writes
//! - Live resharding when asked to coordinate one
//! - Failure probing of its peers

pub mod http;
pub mod node;
pub mod peer_client;
pub mod probe;
pub mod protocol;
pub mod replication;
pub mod reshard;
pub mod server;
pub mod shard;
pub mod store;
pub mod view;

pub use node::{Replica, Route};
pub use replication::{DeleteOutcome, PutOutcome};
pub use reshard::ReshardReport;
pub use server::{run, ReplicaServer};
