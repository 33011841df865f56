//! JSON bodies exchanged with clients and between replicas
//!
//! Field names keep the legacy wire contract (`causal-metadata`,
//! `socket-address`, `shard-count`), so existing clients and test scripts
//! keep working.

use crate::replica::store::Entry;
use serde::{Deserialize, Serialize};

/// Client PUT body. A missing value is reported as a validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(rename = "causal-metadata", default)]
    pub causal_metadata: Vec<u64>,
}

/// Client DELETE body (optional).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "causal-metadata", default)]
    pub causal_metadata: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutResponse {
    pub message: String,
    pub replaced: bool,
    pub version: u64,
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: Vec<u64>,
    #[serde(rename = "shard-id")]
    pub shard_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub message: String,
    pub value: String,
    pub version: u64,
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    #[serde(rename = "doesExist")]
    pub does_exist: bool,
    pub message: String,
    pub version: u64,
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: Vec<u64>,
}

/// Acknowledgement of a peer push (data or clock).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaAck {
    pub message: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaAddress {
    #[serde(rename = "socket-address")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewResponse {
    pub message: String,
    pub view: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliveResponse {
    pub alive: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockUpdate {
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshardRequest {
    #[serde(rename = "shard-count")]
    pub shard_count: u64,
}

/// Instruction broadcast by the reshard coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehashRequest {
    #[serde(rename = "shard-count")]
    pub shard_count: u64,
    /// Clock value after the wipe; absent means zero.
    #[serde(rename = "resume-version", default, skip_serializing_if = "Option::is_none")]
    pub resume_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshardResponse {
    pub message: String,
    #[serde(rename = "shard-count")]
    pub shard_count: u64,
    pub harvested: usize,
    pub redistributed: usize,
}

/// Shard layout handed to a late-joining replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    #[serde(rename = "shard-count")]
    pub shard_count: u64,
    pub view: String,
}

/// Full local key set plus the sender's clock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transfer {
    pub entries: Vec<Entry>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardIdsResponse {
    pub message: String,
    #[serde(rename = "shard-ids")]
    pub shard_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeShardIdResponse {
    pub message: String,
    #[serde(rename = "shard-id")]
    pub shard_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMembersResponse {
    pub message: String,
    #[serde(rename = "shard-id-members")]
    pub members: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardKeyCountResponse {
    pub message: String,
    #[serde(rename = "shard-id-key-count")]
    pub key_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_request_tolerates_missing_fields() {
        let req: PutRequest = serde_json::from_str("{}").unwrap();
        assert!(req.value.is_none());
        assert!(req.causal_metadata.is_empty());

        let req: PutRequest =
            serde_json::from_str(r#"{"value":"1","causal-metadata":[1,2]}"#).unwrap();
        assert_eq!(req.value.as_deref(), Some("1"));
        assert_eq!(req.causal_metadata, vec![1, 2]);
    }

    #[test]
    fn test_rehash_request_wire_names() {
        let json = serde_json::to_value(RehashRequest {
            shard_count: 2,
            resume_version: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "shard-count": 2 }));

        let req: RehashRequest =
            serde_json::from_str(r#"{"shard-count":3,"resume-version":9}"#).unwrap();
        assert_eq!(req.resume_version, Some(9));
    }

    #[test]
    fn test_replica_address_wire_name() {
        let addr: ReplicaAddress =
            serde_json::from_str(r#"{"socket-address":"10.10.0.4:8080"}"#).unwrap();
        assert_eq!(addr.address, "10.10.0.4:8080");
    }
}
