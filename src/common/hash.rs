//! Hashing utilities for causalkv
//!
//! - CRC-32 (IEEE) positions keys and virtual nodes on the shard ring
//! - Virtual node names are derived from shard and virtual index only, so
//!   placement is stable across rebuilds with the same shard count

/// Position of an arbitrary string on the ring
pub fn ring_hash(data: &str) -> u32 {
    crc32fast::hash(data.as_bytes())
}

/// Name of the `vnode`-th virtual node of shard `shard`
pub fn virtual_node_name(shard: usize, vnode: usize) -> String {
    format!("Shard_{}_VirtShard_{}", shard, vnode)
}

/// Ring position of the `vnode`-th virtual node of shard `shard`
pub fn virtual_node_hash(shard: usize, vnode: usize) -> u32 {
    ring_hash(&virtual_node_name(shard, vnode))
}
