//! Version vectors (causal metadata)
//!
//! A vector maps node address -> number of operations from that node a
//! replica has applied. Absent entries read as 0. Counters only grow.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `node`, 0 when absent
    pub fn get(&self, node: &str) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Record one more operation from `node`
    pub fn increment(&mut self, node: &str) -> u64 {
        let counter = self.0.entry(node.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// True if no entry of `self` exceeds the matching entry of `other`,
    /// ignoring `except` when given.
    pub fn not_ahead_of(&self, other: &VersionVector, except: Option<&str>) -> bool {
        self.0
            .iter()
            .filter(|(node, _)| Some(node.as_str()) != except)
            .all(|(node, &t)| t <= other.get(node))
    }

    /// Admission check of `incoming` against this (local) vector.
    ///
    /// Client path (`sender == local`): the caller must not have seen
    /// anything this replica hasn't. Replication path: the sender's own
    /// counter must be exactly the next one, and it must not be ahead of us
    /// on any third party.
    pub fn admits(&self, incoming: &VersionVector, sender: &str, local: &str) -> bool {
        if sender == local {
            incoming.not_ahead_of(self, None)
        } else {
            incoming.get(sender) == self.get(sender) + 1
                && incoming.not_ahead_of(self, Some(sender))
        }
    }

    /// Pointwise maximum of two vectors
    pub fn merged(&self, other: &VersionVector) -> VersionVector {
        let mut out = self.clone();
        for (node, &t) in &other.0 {
            let entry = out.0.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(t);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, t)| (n.into(), t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(entries: &[(&str, u64)]) -> VersionVector {
        entries.iter().map(|&(n, t)| (n, t)).collect()
    }

    #[test]
    fn test_absent_reads_zero() {
        let v = VersionVector::new();
        assert_eq!(v.get("A"), 0);
    }

    #[test]
    fn test_increment() {
        let mut v = VersionVector::new();
        assert_eq!(v.increment("A"), 1);
        assert_eq!(v.increment("A"), 2);
        assert_eq!(v, vv(&[("A", 2)]));
    }

    #[test]
    fn test_client_path_admission() {
        let local = vv(&[("A", 2), ("B", 1)]);
        assert!(local.admits(&vv(&[]), "A", "A"));
        assert!(local.admits(&vv(&[("A", 2)]), "A", "A"));
        assert!(local.admits(&vv(&[("A", 1), ("B", 1)]), "A", "A"));
        assert!(!local.admits(&vv(&[("A", 3)]), "A", "A"));
        assert!(!local.admits(&vv(&[("C", 1)]), "A", "A"));
        // Explicit zeros are the same as absent entries
        assert!(local.admits(&vv(&[("C", 0)]), "A", "A"));
    }

    #[test]
    fn test_replication_path_admission() {
        let local = vv(&[("A", 1), ("C", 4)]);
        // B is the local node, A sends
        assert!(local.admits(&vv(&[("A", 2)]), "A", "B"));
        assert!(local.admits(&vv(&[("A", 2), ("C", 4)]), "A", "B"));
        // Replay and gaps are rejected
        assert!(!local.admits(&vv(&[("A", 1)]), "A", "B"));
        assert!(!local.admits(&vv(&[("A", 3)]), "A", "B"));
        // Sender ahead of us on a third party
        assert!(!local.admits(&vv(&[("A", 2), ("C", 5)]), "A", "B"));
    }

    #[test]
    fn test_merged() {
        let a = vv(&[("A", 3), ("B", 1)]);
        let b = vv(&[("B", 4), ("C", 2)]);
        assert_eq!(a.merged(&b), vv(&[("A", 3), ("B", 4), ("C", 2)]));
        assert_eq!(a.merged(&VersionVector::new()), a);
    }

    #[test]
    fn test_serde_shape() {
        let v = vv(&[("10.0.0.2:8090", 3)]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"10.0.0.2:8090":3}"#);
        let back: VersionVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
