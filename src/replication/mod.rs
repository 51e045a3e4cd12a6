//! Node-to-node messaging
//!
//! `protocol` defines the JSON bodies and internal endpoints; `replicator`
//! sends them, retrying peers that are not ready and evicting peers that
//! cannot be reached.

pub mod protocol;
pub mod replicator;

pub use protocol::{
    KeyTransfer, KvsRequest, ReplicatedDelete, ReplicatedPut, ReshardRequest, ShardMemberChange,
    ViewChange,
};
pub use replicator::{Dispatched, PeerResponse, Replicator};
