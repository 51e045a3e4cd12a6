//! Error types for causalkv

use crate::kvs::VersionVector;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Causal Store Errors ===
    /// The caller's causal context is ahead of this replica. Carries the
    /// replica's current vector so the caller can re-derive its context.
    #[error("Causal dependencies not satisfied; try again later")]
    InvalidMetadata(VersionVector),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key is too long: {len} characters (max {max})")]
    KeyTooLong { len: usize, max: usize },

    #[error("PUT request does not specify a value")]
    MissingValue,

    // === Ring Errors ===
    #[error("Not enough nodes to provide fault tolerance: {nodes} nodes for {shards} shards")]
    NotEnoughNodes { nodes: usize, shards: usize },

    #[error("Invalid shard count: {0}")]
    InvalidShardCount(usize),

    #[error("Shard not found: {0}")]
    ShardNotFound(usize),

    #[error("Node not in view: {0}")]
    NodeNotInView(String),

    #[error("Node not assigned to a shard")]
    NodeUnassigned,

    // === Network Errors ===
    #[error("Node {node} unreachable: {reason}")]
    NodeUnreachable { node: String, reason: String },

    #[error("All nodes specified are down or unresponsive")]
    AllNodesUnreachable,

    // === Request / Encoding Errors ===
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidMetadata(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::KeyNotFound(_) | Error::ShardNotFound(_) | Error::NodeNotInView(_) => {
                StatusCode::NOT_FOUND
            }
            Error::KeyTooLong { .. }
            | Error::MissingValue
            | Error::NotEnoughNodes { .. }
            | Error::InvalidShardCount(_)
            | Error::BadRequest(_)
            | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::NodeUnreachable { .. } | Error::AllNodesUnreachable => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::InvalidMetadata(VersionVector::new()).to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::KeyNotFound("k".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NotEnoughNodes { nodes: 6, shards: 4 }.to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::AllNodesUnreachable.to_http_status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
