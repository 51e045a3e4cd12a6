//! In-memory causal key-value store
//!
//! Entries and the version vector live behind one lock: the admission
//! check, the mutation and the vector copy handed back to the caller all
//! happen in a single critical section.

use super::{Value, VersionVector};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Serialized form of a store, used to clone a shard onto a new replica
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub data: HashMap<String, Value>,
    pub metadata: VersionVector,
    #[serde(rename = "localAddress")]
    pub local_address: String,
}

#[derive(Debug, Default)]
struct StoreState {
    data: HashMap<String, Value>,
    metadata: VersionVector,
}

/// One replica's view of its shard's data
pub struct CausalStore {
    local_address: String,
    state: Mutex<StoreState>,
}

impl CausalStore {
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic mid-operation leaves no partial write: every mutation
        // happens after the last fallible step.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read a key under the client-path admission rule
    pub fn get(&self, key: &str, metadata: &VersionVector) -> Result<(Value, VersionVector)> {
        let state = self.lock();
        if !state.metadata.admits(metadata, &self.local_address, &self.local_address) {
            return Err(Error::InvalidMetadata(state.metadata.clone()));
        }

        match state.data.get(key) {
            Some(value) => Ok((value.clone(), state.metadata.clone())),
            None => Err(Error::KeyNotFound(key.to_string())),
        }
    }

    /// Write a key. Returns whether the key was newly created and the
    /// vector after this write.
    pub fn put(
        &self,
        key: &str,
        value: Value,
        metadata: &VersionVector,
        sender: &str,
    ) -> Result<(bool, VersionVector)> {
        let mut state = self.lock();
        if !state.metadata.admits(metadata, sender, &self.local_address) {
            return Err(Error::InvalidMetadata(state.metadata.clone()));
        }

        let created = state.data.insert(key.to_string(), value).is_none();
        state.metadata.increment(sender);
        Ok((created, state.metadata.clone()))
    }

    /// Delete a key, returning the vector after this delete
    pub fn delete(&self, key: &str, metadata: &VersionVector, sender: &str) -> Result<VersionVector> {
        let mut state = self.lock();
        if !state.metadata.admits(metadata, sender, &self.local_address) {
            return Err(Error::InvalidMetadata(state.metadata.clone()));
        }

        if state.data.remove(key).is_none() {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        state.metadata.increment(sender);
        Ok(state.metadata.clone())
    }

    /// Data transfer during resharding: no admission check, vector untouched
    pub fn put_unchecked(&self, key: &str, value: Value) {
        self.lock().data.insert(key.to_string(), value);
    }

    /// Would `metadata` from `sender` be admitted right now?
    pub fn is_metadata_valid(&self, metadata: &VersionVector, sender: &str) -> bool {
        self.lock()
            .metadata
            .admits(metadata, sender, &self.local_address)
    }

    /// Copy of the current vector
    pub fn metadata(&self) -> VersionVector {
        self.lock().metadata.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().data.is_empty()
    }

    /// Remove and return every entry whose key matches `moved`
    pub fn drain_where<F>(&self, mut moved: F) -> Vec<(String, Value)>
    where
        F: FnMut(&str) -> bool,
    {
        let mut state = self.lock();
        let keys: Vec<String> = state.data.keys().filter(|k| moved(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| state.data.remove(&k).map(|v| (k, v)))
            .collect()
    }

    /// Fold another replica's snapshot into this one. The vector becomes
    /// the pointwise maximum of both; entries missing here are copied when
    /// `owned` accepts their key. Existing entries are never overwritten.
    /// Returns how many entries were copied.
    pub fn absorb<F>(&self, snapshot: StoreSnapshot, owned: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut state = self.lock();
        state.metadata = state.metadata.merged(&snapshot.metadata);

        let mut copied = 0;
        for (key, value) in snapshot.data {
            if owned(&key) && !state.data.contains_key(&key) {
                state.data.insert(key, value);
                copied += 1;
            }
        }
        copied
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.lock();
        StoreSnapshot {
            data: state.data.clone(),
            metadata: state.metadata.clone(),
            local_address: self.local_address.clone(),
        }
    }

    /// Replace entries and vector with a peer's snapshot; the local address
    /// is kept.
    pub fn restore(&self, snapshot: StoreSnapshot) {
        let mut state = self.lock();
        state.data = snapshot.data;
        state.metadata = snapshot.metadata;
    }
}
