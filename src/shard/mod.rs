//! Sharding: membership, the consistent hash ring, and shard placement
//!
//! Keys are assigned to shards by consistent hashing over virtual nodes;
//! each shard is served by a replica set of at least two nodes.

pub mod placement;
pub mod ring;
pub mod view;

pub use placement::PlacementManager;
pub use ring::{
    FullRebuild, Rebalance, Ring, Shard, VirtualNode, MIN_REPLICAS_PER_SHARD,
    VIRTUAL_NODES_PER_SHARD,
};
pub use view::{Membership, View};
