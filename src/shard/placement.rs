//! Shared, lock-guarded ring
//!
//! `PlacementManager` owns the node's current `Ring` and the strategy used to
//! replace it on reshard. Readers get answers or clones, never a reference
//! that outlives the lock.

use super::ring::{FullRebuild, Rebalance, Ring};
use crate::common::Result;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

pub struct PlacementManager {
    ring: Mutex<Ring>,
    strategy: Box<dyn Rebalance>,
}

impl PlacementManager {
    pub fn new(ring: Ring) -> Self {
        Self::with_strategy(ring, FullRebuild)
    }

    pub fn with_strategy(ring: Ring, strategy: impl Rebalance) -> Self {
        Self {
            ring: Mutex::new(ring),
            strategy: Box::new(strategy),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current ring
    pub fn snapshot(&self) -> Ring {
        self.lock().clone()
    }

    /// Swap in a ring received from a peer
    pub fn replace(&self, ring: Ring) {
        *self.lock() = ring;
    }

    pub fn route_key(&self, key: &str) -> Option<usize> {
        self.lock().route_key(key)
    }

    pub fn shard_count(&self) -> usize {
        self.lock().shard_count()
    }

    pub fn members(&self, shard_id: usize) -> Result<BTreeSet<String>> {
        self.lock().members(shard_id).cloned()
    }

    pub fn shard_id_for_node(&self, node: &str) -> Option<usize> {
        self.lock().shard_id_for_node(node)
    }

    pub fn add_node_to_shard(&self, shard_id: usize, node: &str) -> Result<()> {
        self.lock().add_node_to_shard(shard_id, node)
    }

    pub fn remove_node(&self, node: &str) -> bool {
        self.lock().remove_node(node)
    }

    /// Reshard to `shard_count` over `nodes`. On error the ring is unchanged.
    /// Returns the ring now in place.
    pub fn reshard(&self, shard_count: usize, nodes: &BTreeSet<String>) -> Result<Ring> {
        let mut ring = self.lock();
        let next = self.strategy.reshard(&ring, shard_count, nodes)?;
        tracing::info!(
            strategy = self.strategy.name(),
            from = ring.shard_count(),
            to = next.shard_count(),
            "Resharded ring"
        );
        *ring = next.clone();
        Ok(next)
    }
}
