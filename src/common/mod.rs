//! Common utilities and types shared across shardkv

pub mod config;
pub mod error;
pub mod hash;
pub mod tracing_middleware;
pub mod utils;

pub use config::{ReplicaConfig, ReshardClock};
pub use error::{Error, Result};
pub use hash::{checksum32, route_key};
pub use utils::{encode_key, split_addresses, validate_key, validate_write, MAX_KEY_CHARS};
