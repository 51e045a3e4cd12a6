//! Causal key-value store
//!
//! Per-replica data plus a version vector. Every operation carries the
//! caller's causal context and is admitted or rejected against the local
//! vector:
//! - client calls (`sender` = this node) must not be ahead of this replica
//! - replicated calls must carry exactly the sender's next counter

pub mod metadata;
pub mod store;
pub mod value;

pub use metadata::VersionVector;
pub use store::{CausalStore, StoreSnapshot};
pub use value::Value;
