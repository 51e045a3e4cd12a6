//! Consistent hash ring for sharding
//!
//! Each shard owns `VIRTUAL_NODES_PER_SHARD` positions on a CRC-32 ring.
//! Keys route to the first virtual node at or after their hash, wrapping
//! around to the start. Shards map to replica sets of node addresses.

use crate::common::{ring_hash, virtual_node_hash, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Minimum replicas each shard must keep after a reshard
pub const MIN_REPLICAS_PER_SHARD: usize = 2;

/// Ring positions per shard
pub const VIRTUAL_NODES_PER_SHARD: usize = 10;

/// One ring position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNode {
    #[serde(rename = "hash-id")]
    pub hash: u32,
    #[serde(rename = "shard-id")]
    pub shard_id: usize,
}

/// Replica set of one shard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub replicas: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ring {
    /// Sorted ascending by hash
    #[serde(rename = "virt-shards")]
    virtual_nodes: Vec<VirtualNode>,
    shards: Vec<Shard>,
}

#[derive(Deserialize)]
struct RawRing {
    #[serde(rename = "virt-shards", default)]
    virtual_nodes: Vec<VirtualNode>,
    #[serde(default)]
    shards: Vec<Shard>,
}

impl<'de> Deserialize<'de> for Ring {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawRing::deserialize(deserializer)?;
        if let Some(bad) = raw.virtual_nodes.iter().find(|v| v.shard_id >= raw.shards.len()) {
            return Err(serde::de::Error::custom(format!(
                "virtual node points at unknown shard {}",
                bad.shard_id
            )));
        }
        let mut ring = Ring {
            virtual_nodes: raw.virtual_nodes,
            shards: raw.shards,
        };
        ring.sort_virtual_nodes();
        Ok(ring)
    }
}

impl Ring {
    /// Build `shard_count` shards with their virtual nodes and spread
    /// `nodes` over them round-robin (in sorted order).
    pub fn build<'a, I>(shard_count: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut virtual_nodes = Vec::with_capacity(shard_count * VIRTUAL_NODES_PER_SHARD);
        for shard_id in 0..shard_count {
            for vnode in 0..VIRTUAL_NODES_PER_SHARD {
                virtual_nodes.push(VirtualNode {
                    hash: virtual_node_hash(shard_id, vnode),
                    shard_id,
                });
            }
        }

        let mut ring = Ring {
            virtual_nodes,
            shards: vec![Shard::default(); shard_count],
        };
        ring.sort_virtual_nodes();

        if shard_count > 0 {
            let sorted: BTreeSet<&String> = nodes.into_iter().collect();
            for (i, node) in sorted.into_iter().enumerate() {
                ring.shards[i % shard_count].replicas.insert(node.clone());
            }
        }

        ring
    }

    /// Ring with no shards, held by a joining node until it clones one
    pub fn empty() -> Self {
        Self::default()
    }

    fn sort_virtual_nodes(&mut self) {
        self.virtual_nodes
            .sort_by(|a, b| a.hash.cmp(&b.hash).then(a.shard_id.cmp(&b.shard_id)));
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn virtual_nodes(&self) -> &[VirtualNode] {
        &self.virtual_nodes
    }

    /// Shard owning `key`; `None` only on an empty ring
    pub fn route_key(&self, key: &str) -> Option<usize> {
        let hash = ring_hash(key);
        let idx = self.virtual_nodes.partition_point(|v| v.hash < hash);
        self.virtual_nodes
            .get(idx)
            .or_else(|| self.virtual_nodes.first())
            .map(|v| v.shard_id)
    }

    /// Replica set of a shard
    pub fn members(&self, shard_id: usize) -> Result<&BTreeSet<String>> {
        self.shards
            .get(shard_id)
            .map(|s| &s.replicas)
            .ok_or(Error::ShardNotFound(shard_id))
    }

    /// Add `node` to a shard, leaving any shard it was in before
    pub fn add_node_to_shard(&mut self, shard_id: usize, node: &str) -> Result<()> {
        if shard_id >= self.shards.len() {
            return Err(Error::ShardNotFound(shard_id));
        }
        for (id, shard) in self.shards.iter_mut().enumerate() {
            if id != shard_id {
                shard.replicas.remove(node);
            }
        }
        self.shards[shard_id].replicas.insert(node.to_string());
        Ok(())
    }

    /// Remove `node` from whichever shard holds it. Returns whether it was found.
    pub fn remove_node(&mut self, node: &str) -> bool {
        self.shards
            .iter_mut()
            .fold(false, |found, shard| shard.replicas.remove(node) || found)
    }

    /// Shard that `node` belongs to, `None` if unassigned
    pub fn shard_id_for_node(&self, node: &str) -> Option<usize> {
        self.shards.iter().position(|s| s.replicas.contains(node))
    }

    /// Total number of replica slots across shards
    pub fn node_count(&self) -> usize {
        self.shards.iter().map(|s| s.replicas.len()).sum()
    }
}

/// Strategy producing a new ring when the shard count changes
pub trait Rebalance: Send + Sync + 'static {
    fn reshard(&self, current: &Ring, shard_count: usize, nodes: &BTreeSet<String>) -> Result<Ring>;

    fn name(&self) -> &'static str;
}

/// Rebuilds the ring from scratch, discarding the previous placement.
/// Moves more keys than a minimal rebalance would.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullRebuild;

impl Rebalance for FullRebuild {
    fn reshard(&self, current: &Ring, shard_count: usize, nodes: &BTreeSet<String>) -> Result<Ring> {
        if shard_count == 0 {
            return Err(Error::InvalidShardCount(0));
        }
        if shard_count == current.shard_count() {
            return Ok(current.clone());
        }
        if nodes.len() / shard_count < MIN_REPLICAS_PER_SHARD {
            return Err(Error::NotEnoughNodes {
                nodes: nodes.len(),
                shards: shard_count,
            });
        }
        Ok(Ring::build(shard_count, nodes))
    }

    fn name(&self) -> &'static str {
        "full-rebuild"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> BTreeSet<String> {
        (1..=n).map(|i| format!("n{}", i)).collect()
    }

    #[test]
    fn test_build_balances_replicas() {
        let ring = Ring::build(3, &nodes(6));
        assert_eq!(ring.shard_count(), 3);
        assert_eq!(ring.virtual_nodes().len(), 30);
        for shard in ring.shards() {
            assert_eq!(shard.replicas.len(), 2);
        }
    }

    #[test]
    fn test_virtual_nodes_sorted() {
        let ring = Ring::build(5, &nodes(10));
        assert!(ring
            .virtual_nodes()
            .windows(2)
            .all(|w| w[0].hash <= w[1].hash));
    }

    #[test]
    fn test_placement_independent_of_membership() {
        let a = Ring::build(4, &nodes(8));
        let b = Ring::build(4, &nodes(2));
        assert_eq!(a.virtual_nodes(), b.virtual_nodes());
    }

    #[test]
    fn test_route_key_wraps() {
        let ring = Ring::build(2, &nodes(4));
        let last = ring.virtual_nodes().last().unwrap();
        let first = ring.virtual_nodes().first().unwrap();
        // Find a key hashing past the last virtual node
        let key = (0..100_000)
            .map(|i| format!("k{}", i))
            .find(|k| ring_hash(k) > last.hash)
            .expect("some key hashes past the last virtual node");
        assert_eq!(ring.route_key(&key), Some(first.shard_id));
    }

    #[test]
    fn test_route_key_exact_hit() {
        let ring = Ring::build(3, &nodes(6));
        let hash = virtual_node_hash(1, 4);
        let vnode = ring
            .virtual_nodes()
            .iter()
            .find(|v| v.hash == hash)
            .unwrap();
        assert_eq!(ring.route_key("Shard_1_VirtShard_4"), Some(vnode.shard_id));
    }

    #[test]
    fn test_empty_ring_routes_nowhere() {
        assert_eq!(Ring::empty().route_key("x"), None);
    }

    #[test]
    fn test_add_and_remove_node() {
        let mut ring = Ring::build(2, &nodes(4));
        ring.add_node_to_shard(1, "new").unwrap();
        assert_eq!(ring.shard_id_for_node("new"), Some(1));

        // Moving keeps the node in exactly one shard
        ring.add_node_to_shard(0, "new").unwrap();
        assert_eq!(ring.shard_id_for_node("new"), Some(0));
        assert!(!ring.members(1).unwrap().contains("new"));

        assert!(ring.remove_node("new"));
        assert!(!ring.remove_node("new"));
        assert_eq!(ring.shard_id_for_node("new"), None);

        assert!(matches!(
            ring.add_node_to_shard(9, "x"),
            Err(Error::ShardNotFound(9))
        ));
    }

    #[test]
    fn test_full_rebuild() {
        let all = nodes(6);
        let ring = Ring::build(3, &all);

        let same = FullRebuild.reshard(&ring, 3, &all).unwrap();
        assert_eq!(same, ring);

        let two = FullRebuild.reshard(&ring, 2, &all).unwrap();
        assert_eq!(two.shard_count(), 2);
        assert_eq!(two.node_count(), 6);

        assert!(matches!(
            FullRebuild.reshard(&ring, 4, &all),
            Err(Error::NotEnoughNodes { nodes: 6, shards: 4 })
        ));
        assert!(matches!(
            FullRebuild.reshard(&ring, 0, &all),
            Err(Error::InvalidShardCount(0))
        ));
    }

    #[test]
    fn test_deserialize_restores_order() {
        let json = r#"{
            "virt-shards": [{"hash-id": 30, "shard-id": 1}, {"hash-id": 10, "shard-id": 0}],
            "shards": [{"replicas": ["a"]}, {"replicas": ["b"]}]
        }"#;
        let ring: Ring = serde_json::from_str(json).unwrap();
        assert_eq!(ring.virtual_nodes()[0].hash, 10);
        assert_eq!(ring.route_key("anything").map(|s| s < 2), Some(true));

        let bad = r#"{"virt-shards": [{"hash-id": 1, "shard-id": 5}], "shards": []}"#;
        assert!(serde_json::from_str::<Ring>(bad).is_err());
    }
}
