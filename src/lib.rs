//! # shardkv
//!
//! A replicated, horizontally partitioned key-value store with:
//! - Shards of at least two replicas, keys routed by CRC-32
//! - Causal admission against a store-wide logical clock
//! - One-hop replication from the accepting replica
//! - Live resharding (harvest, wipe, redistribute)
//! - HTTP for both the public API and replica-to-replica calls
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            client
//!              │ HTTP
//!   ┌──────────▼───────────┐   forward   ┌──────────────────────┐
//!   │ Replica (shard 1)    ├────────────►│ Replica (shard 2)    │
//!   │  view, shard table,  │             │  view, shard table,  │
//!   │  causal store        │◄────────────┤  causal store        │
//!   └──────────┬───────────┘ clock update└──────────────────────┘
//!              │ replicate
//!   ┌──────────▼───────────┐
//!   │ Replica (shard 1)    │
//!   └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a replica
//! ```bash
//! SOCKET_ADDRESS=10.10.0.2:8080 \
//! VIEW=10.10.0.2:8080,10.10.0.3:8080,10.10.0.4:8080,10.10.0.5:8080 \
//! SHARD_COUNT=2 \
//! shardkv-replica
//! ```
//!
//! ### Use the CLI
//! ```bash
//! shardkv --replica 10.10.0.2:8080 put a 1
//! shardkv --replica 10.10.0.2:8080 get a
//! shardkv --replica 10.10.0.2:8080 reshard 1
//! ```

pub mod common;
pub mod replica;

// Re-export commonly used types
pub use common::{Error, ReplicaConfig, Result};
pub use replica::{Replica, ReplicaServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
