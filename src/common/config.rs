//! Configuration for a shardkv replica

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up next to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "shardkv.toml";

/// Replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Network identity of this replica ("ip:port"), as peers reach it
    #[serde(default)]
    pub socket_address: String,

    /// Seed membership (may or may not include this replica)
    #[serde(default)]
    pub view: Vec<String>,

    /// Initial shard count; `None` joins late and copies the layout from a peer
    #[serde(default)]
    pub shard_count: Option<u64>,

    /// Local bind address for the HTTP listener
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Pause between harvest calls during a reshard
    #[serde(default = "default_harvest_settle_ms")]
    pub harvest_settle_ms: u64,

    /// Bounded wait for the shard data copy when joining a shard
    #[serde(default = "default_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,

    /// Failure probe period
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Per-peer timeout of a single probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Announce ourselves to a random peer at startup
    #[serde(default = "default_true")]
    pub announce: bool,

    /// Re-apply buffered writes once the clock reaches their predecessor
    #[serde(default = "default_true")]
    pub drain_pending: bool,

    /// Out-of-order writes held at most; further ones stall without buffering
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// What the logical clock becomes after a reshard wipe
    #[serde(default)]
    pub reshard_clock: ReshardClock,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Clock policy applied by the reshard wipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReshardClock {
    /// Restart the clock at zero (legacy behavior).
    #[default]
    Reset,
    /// Resume from the highest version seen during the harvest.
    Resume,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_harvest_settle_ms() -> u64 {
    3_000
}
fn default_bootstrap_timeout_secs() -> u64 {
    25
}
fn default_probe_interval_ms() -> u64 {
    1_000
}
fn default_probe_timeout_ms() -> u64 {
    500
}
fn default_max_pending() -> usize {
    crate::replica::store::DEFAULT_MAX_PENDING
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            socket_address: String::new(),
            view: Vec::new(),
            shard_count: None,
            bind_addr: default_bind_addr(),
            harvest_settle_ms: default_harvest_settle_ms(),
            bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            announce: true,
            drain_pending: true,
            max_pending: default_max_pending(),
            reshard_clock: ReshardClock::Reset,
            log_level: default_log_level(),
        }
    }
}

impl ReplicaConfig {
    /// Load from an optional TOML file, then `SHARDKV_*` environment variables.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("SHARDKV")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("view"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Reject configurations the replica cannot boot with.
    pub fn validate(&self) -> Result<()> {
        if self.socket_address.trim().is_empty() {
            return Err(Error::InvalidConfig("socket address is required".into()));
        }
        if self.shard_count == Some(0) {
            return Err(Error::InvalidConfig("shard count must be positive".into()));
        }
        if self.shard_count.is_none() && self.view.iter().all(|a| *a == self.socket_address) {
            return Err(Error::InvalidConfig(
                "a replica without a shard count needs at least one peer in its view".into(),
            ));
        }
        Ok(())
    }

    pub fn harvest_settle(&self) -> Duration {
        Duration::from_millis(self.harvest_settle_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ReplicaConfig::default();
        assert_eq!(config.harvest_settle(), Duration::from_secs(3));
        assert_eq!(config.bootstrap_timeout(), Duration::from_secs(25));
        assert_eq!(config.reshard_clock, ReshardClock::Reset);
        assert!(config.drain_pending);
        assert_eq!(config.max_pending, 1_024);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
socket_address = "10.10.0.2:8080"
view = ["10.10.0.2:8080", "10.10.0.3:8080"]
shard_count = 1
harvest_settle_ms = 0
reshard_clock = "resume"
"#
        )
        .unwrap();

        let config = ReplicaConfig::load(file.path()).unwrap();
        assert_eq!(config.socket_address, "10.10.0.2:8080");
        assert_eq!(config.view.len(), 2);
        assert_eq!(config.shard_count, Some(1));
        assert_eq!(config.harvest_settle_ms, 0);
        assert_eq!(config.reshard_clock, ReshardClock::Resume);
        // Untouched fields keep their defaults
        assert_eq!(config.probe_interval_ms, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ReplicaConfig::load(dir.path().join("absent.toml")).unwrap();
        assert!(config.socket_address.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = ReplicaConfig {
            socket_address: "10.10.0.2:8080".into(),
            view: vec!["10.10.0.2:8080".into()],
            shard_count: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.shard_count = None;
        assert!(config.validate().is_err());

        config.view.push("10.10.0.3:8080".into());
        assert!(config.validate().is_ok());
    }
}
