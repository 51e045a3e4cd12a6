//! # causalkv
//!
//! A sharded, replicated key-value store with causal consistency:
//! - Version-vector admission on every read and write
//! - Consistent-hash ring with virtual nodes, resharding on demand
//! - Shard-scoped replication with dead-node eviction
//! - Plain HTTP/JSON between clients and nodes and between nodes
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            client (carries causal-metadata)
//!                        │ HTTP
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │ any node: routes key → shard on the ring     │
//! │   local shard  → causal store + replicate    │
//! │   remote shard → forward to its replicas     │
//! └───────┬──────────────────────────┬───────────┘
//!         │ /rep/kvs                 │ /kvs/:key
//! ┌───────▼─────────┐       ┌────────▼────────┐
//! │ Shard 0         │       │ Shard 1         │
//! │ n1, n3          │       │ n2, n4          │
//! └─────────────────┘       └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a founding node
//! ```bash
//! SOCKET_ADDRESS=10.0.0.2:8090 VIEW=10.0.0.2:8090,10.0.0.3:8090,10.0.0.4:8090,10.0.0.5:8090 \
//!   causalkv-node serve --shard-count 2
//! ```
//!
//! ### Join a running cluster
//! ```bash
//! causalkv-node serve --address 10.0.0.6:8090 --view 10.0.0.2:8090
//! ```
//!
//! ### Use the CLI
//! ```bash
//! causalkv put my-key '"hello"' --node localhost:8090
//! causalkv get my-key --metadata '{"10.0.0.2:8090":1}'
//! causalkv add-member 1 10.0.0.6:8090
//! causalkv reshard 3
//! ```

pub mod common;
pub mod kvs;
pub mod node;
pub mod replication;
pub mod shard;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use kvs::{CausalStore, Value, VersionVector};
pub use node::{ClusterNode, NodeServer};
pub use replication::Replicator;
pub use shard::{Membership, PlacementManager, Ring};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
