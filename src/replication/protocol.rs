//! Wire messages exchanged between nodes and with clients
//!
//! All bodies are JSON. Field names follow the public API
//! (`causal-metadata`, `socket-address`, `shard-id`, `shard-count`).

use crate::common::Result;
use crate::kvs::{Value, VersionVector};
use axum::body::Bytes;
use serde::{Deserialize, Serialize};

/// Client-facing view endpoint; also used to propagate joins and evictions
pub const VIEW: &str = "/view";
/// Replicated put/delete (method selects which)
pub const REP_KVS: &str = "/rep/kvs";
/// Shard membership change
pub const REP_ADD_MEMBER: &str = "/rep/shard/add-member";
/// New ring after a reshard
pub const REP_RESHARD: &str = "/rep/shard/reshard";
/// Key transfer without causal checks
pub const REP_TRANSFER: &str = "/rep/shard/kvs";
/// Clone the ring (joining nodes)
pub const REP_CLONE_RING: &str = "/rep/shard";
/// Clone a replica's store (new shard members)
pub const REP_CLONE_DATA: &str = "/rep/clone-shard-data";

/// Client path for a key
pub fn kvs_path(key: &str) -> String {
    format!("/kvs/{}", crate::common::encode_key(key))
}

/// Body of a client `/kvs/:key` request. Every field is optional on the
/// wire; `null` metadata is an empty causal context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "causal-metadata", default)]
    pub causal_metadata: Option<VersionVector>,
}

impl KvsRequest {
    /// Parse a possibly empty body
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(body)?)
    }

    pub fn metadata(&self) -> VersionVector {
        self.causal_metadata.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedPut {
    pub key: String,
    pub value: Value,
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: VersionVector,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedDelete {
    pub key: String,
    #[serde(rename = "causal-metadata")]
    pub causal_metadata: VersionVector,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewChange {
    #[serde(rename = "socket-address")]
    pub socket_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMemberChange {
    #[serde(rename = "socket-address")]
    pub socket_address: String,
    #[serde(rename = "shard-id")]
    pub shard_id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReshardRequest {
    #[serde(rename = "shard-count")]
    pub shard_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTransfer {
    pub key: String,
    pub value: Value,
}

/// Serialize a message body
pub fn to_body<T: Serialize>(message: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}
