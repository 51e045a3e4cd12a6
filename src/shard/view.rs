//! Cluster membership (the view)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

/// Set of node addresses currently in the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub nodes: BTreeSet<String>,
}

/// Lock-guarded view owned by the local node
#[derive(Debug, Default)]
pub struct Membership {
    view: Mutex<View>,
}

impl Membership {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            view: Mutex::new(View {
                nodes: nodes.into_iter().map(Into::into).collect(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, node: &str) -> bool {
        self.lock().nodes.contains(node)
    }

    /// Add a node. Returns true if it was already present.
    pub fn put(&self, node: &str) -> bool {
        !self.lock().nodes.insert(node.to_string())
    }

    /// Remove a node. Returns true if it was present.
    pub fn delete(&self, node: &str) -> bool {
        self.lock().nodes.remove(node)
    }

    pub fn as_list(&self) -> Vec<String> {
        self.lock().nodes.iter().cloned().collect()
    }

    pub fn as_set(&self) -> BTreeSet<String> {
        self.lock().nodes.clone()
    }

    /// Every member except `node`
    pub fn others(&self, node: &str) -> BTreeSet<String> {
        self.lock()
            .nodes
            .iter()
            .filter(|n| n.as_str() != node)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_delete() {
        let view = Membership::new(["a:1"]);
        assert!(!view.put("b:1"));
        assert!(view.put("b:1"));
        assert_eq!(view.len(), 2);

        assert!(view.delete("a:1"));
        assert!(!view.delete("a:1"));
        assert!(!view.contains("a:1"));
        assert_eq!(view.as_list(), vec!["b:1".to_string()]);
    }

    #[test]
    fn test_others() {
        let view = Membership::new(["a:1", "b:1", "c:1"]);
        let others = view.others("b:1");
        assert_eq!(others.len(), 2);
        assert!(!others.contains("b:1"));
    }
}
