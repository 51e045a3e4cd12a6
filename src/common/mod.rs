//! Common utilities and types shared across causalkv

pub mod config;
pub mod error;
pub mod hash;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, ReplicationConfig};
pub use error::{Error, Result};
pub use hash::{ring_hash, virtual_node_hash, virtual_node_name};
pub use utils::{encode_key, node_url, validate_key, MAX_KEY_LEN};
