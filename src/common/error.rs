//! Error types for shardkv

use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Client input ===
    #[error("{0}")]
    Validation(String),

    // === Causal admission ===
    #[error("Causality not met: version {version} does not follow clock {clock}")]
    CausalityStall { version: u64, clock: u64 },

    // === Lookup Errors ===
    #[error("Key does not exist: {0}")]
    NotFound(String),

    #[error("Socket address does not exist in the view: {0}")]
    MemberNotFound(String),

    #[error("Socket address already exists in the view: {0}")]
    AlreadyPresent(String),

    #[error("Shard not found: {0}")]
    UnknownShard(u64),

    // === Partitioning ===
    #[error("Not enough nodes to provide fault-tolerance: {members} members cannot fill {shards} shards of at least 2")]
    FaultTolerance { members: usize, shards: u64 },

    #[error("A reshard is already in progress")]
    ReshardInProgress,

    // === Network Errors ===
    #[error("Peer {peer} unreachable: {source}")]
    Transport {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Peer {peer} rejected request with status {status}: {body}")]
    PeerRejected {
        peer: String,
        status: u16,
        body: String,
    },

    #[error("Membership is empty apart from {0}")]
    NoPeers(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a reqwest failure with the peer it was addressed to.
    pub fn transport(peer: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Transport {
            peer: peer.into(),
            source,
        }
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CausalityStall { .. } | Error::Transport { .. } | Error::ReshardInProgress
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Validation(_) | Error::FaultTolerance { .. } | Error::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::CausalityStall { .. } => StatusCode::FAILED_DEPENDENCY,
            Error::NotFound(_) | Error::MemberNotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyPresent(_) | Error::ReshardInProgress => StatusCode::CONFLICT,
            Error::Transport { .. } | Error::PeerRejected { .. } | Error::NoPeers(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-checkable label carried in every error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::CausalityStall { .. } => "stalled",
            Error::NotFound(_) | Error::MemberNotFound(_) | Error::UnknownShard(_) => "not_found",
            Error::AlreadyPresent(_) => "already_present",
            Error::FaultTolerance { .. } => "fault_tolerance",
            Error::ReshardInProgress => "reshard_in_progress",
            Error::Transport { .. } | Error::PeerRejected { .. } | Error::NoPeers(_) => {
                "transport"
            }
            Error::InvalidConfig(_) => "invalid_config",
            Error::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        }
        (
            status,
            axum::Json(json!({
                "error": self.kind(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("I/O error: {}", e))
    }
}
