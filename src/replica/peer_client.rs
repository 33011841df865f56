//! HTTP client for replica-to-replica calls
//!
//! Peer calls carry no retry and, apart from the shard bootstrap copy and the
//! liveness probe, no timeout. A connection failure surfaces as
//! [`Error::Transport`]; a peer answering with a failure status surfaces as
//! [`Error::PeerRejected`], except where the caller needs to tell a stall
//! apart (see [`PeerApply`]).

use crate::common::{encode_key, Error, Result};
use crate::replica::protocol::{
    ClockUpdate, ReplicaAddress, RehashRequest, ShardInfo, ShardKeyCountResponse, Transfer,
};
use crate::replica::store::{Entry, WriteKind};
use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// How a peer answered a pushed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerApply {
    Applied,
    /// The peer buffered the write behind a missing predecessor.
    Stalled,
}

/// Membership change pushed to the rest of the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Add,
    Remove,
}

#[derive(Clone, Default)]
pub struct PeerClient {
    http: reqwest::Client,
}

fn url(addr: &str, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

impl PeerClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn send(&self, addr: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(addr, e))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::PeerRejected {
                peer: addr.to_string(),
                status,
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        addr: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        self.send(addr, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| Error::transport(addr, e))
    }

    async fn send_apply(&self, addr: &str, request: reqwest::RequestBuilder) -> Result<PeerApply> {
        match self.send(addr, request).await {
            Ok(_) => Ok(PeerApply::Applied),
            Err(Error::PeerRejected { status, .. })
                if status == StatusCode::FAILED_DEPENDENCY.as_u16() =>
            {
                Ok(PeerApply::Stalled)
            }
            Err(e) => Err(e),
        }
    }

    /// Push an accepted write to a shard peer.
    pub async fn replicate_write(
        &self,
        addr: &str,
        kind: WriteKind,
        entry: &Entry,
    ) -> Result<PeerApply> {
        let path = format!("/replicate/{}", encode_key(&entry.key));
        let request = match kind {
            WriteKind::Put => self.http.put(url(addr, &path)),
            WriteKind::Delete => self.http.delete(url(addr, &path)),
        };
        self.send_apply(addr, request.json(entry)).await
    }

    /// Push a clock value to a replica outside the owning shard.
    pub async fn clock_update(&self, addr: &str, version: u64) -> Result<PeerApply> {
        let request = self
            .http
            .put(url(addr, "/update"))
            .json(&ClockUpdate { version });
        self.send_apply(addr, request).await
    }

    pub async fn replicate_view(&self, addr: &str, change: ViewChange, member: &str) -> Result<()> {
        let body = ReplicaAddress {
            address: member.to_string(),
        };
        let request = match change {
            ViewChange::Add => self.http.put(url(addr, "/replicate-view")),
            ViewChange::Remove => self.http.delete(url(addr, "/replicate-view")),
        };
        self.send(addr, request.json(&body)).await.map(|_| ())
    }

    pub async fn replicate_shard_member(&self, addr: &str, shard_id: u64, member: &str) -> Result<()> {
        let body = ReplicaAddress {
            address: member.to_string(),
        };
        let request = self
            .http
            .put(url(addr, &format!("/replicate-add-member/{}", shard_id)))
            .json(&body);
        self.send(addr, request).await.map(|_| ())
    }

    /// Ask `addr` to add `member` to its view, as a client would.
    pub async fn announce(&self, addr: &str, member: &str) -> Result<()> {
        let body = ReplicaAddress {
            address: member.to_string(),
        };
        let request = self.http.put(url(addr, "/key-value-store-view")).json(&body);
        self.send(addr, request).await.map(|_| ())
    }

    /// Fetch a replica's full local key set.
    pub async fn fetch_entries(&self, addr: &str, timeout: Option<Duration>) -> Result<Transfer> {
        let mut request = self.http.get(url(addr, "/key-value-store/"));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        self.send_json(addr, request).await
    }

    pub async fn rehash(&self, addr: &str, instruction: &RehashRequest) -> Result<()> {
        let request = self.http.put(url(addr, "/rehash")).json(instruction);
        self.send(addr, request).await.map(|_| ())
    }

    /// Install an entry on `addr`; `replicate` makes it fan out to its shard.
    pub async fn fill(&self, addr: &str, entry: &Entry, replicate: bool) -> Result<()> {
        let path = if replicate { "/fill" } else { "/fill-replica" };
        let request = self.http.put(url(addr, path)).json(entry);
        self.send(addr, request).await.map(|_| ())
    }

    pub async fn shard_info(&self, addr: &str) -> Result<ShardInfo> {
        let request = self.http.get(url(addr, "/key-value-store-shard/get-info"));
        self.send_json(addr, request).await
    }

    pub async fn key_count(&self, addr: &str, shard_id: u64) -> Result<u64> {
        let request = self
            .http
            .get(url(addr, &format!("/forward/key-count/{}", shard_id)));
        let response: ShardKeyCountResponse = self.send_json(addr, request).await?;
        Ok(response.key_count)
    }

    /// Liveness probe; any failure counts as down.
    pub async fn probe(&self, addr: &str, timeout: Duration) -> bool {
        match self
            .http
            .get(url(addr, "/gossip"))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Relay a client key operation to a member of the owning shard.
    ///
    /// The peer's status and body are returned untouched, failures included.
    pub async fn forward(
        &self,
        addr: &str,
        method: Method,
        key: &str,
        body: Bytes,
    ) -> Result<(StatusCode, Bytes)> {
        let response = self
            .http
            .request(method, url(addr, &format!("/kvs/{}", encode_key(key))))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::transport(addr, e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::transport(addr, e))?;
        Ok((status, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        assert_eq!(url("10.10.0.2:8080", "/update"), "http://10.10.0.2:8080/update");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        let client = PeerClient::new();
        // Port 9 (discard) on loopback is not served in test environments
        let err = client.clock_update("127.0.0.1:9", 1).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.is_retryable());

        assert!(!client.probe("127.0.0.1:9", Duration::from_millis(200)).await);
    }
}
