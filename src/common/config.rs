//! Configuration for a causalkv node
//!
//! Sources, lowest priority first: built-in defaults, an optional
//! `causalkv.toml` in the working directory, then environment variables
//! (`SOCKET_ADDRESS`, `VIEW`, `SHARD_COUNT`, `BIND_ADDR`, `LOG_LEVEL`).
//! The node binary applies its CLI flags on top.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file name (extension resolved by the `config` crate)
pub const CONFIG_FILE: &str = "causalkv";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This node's address (host:port), its identity in views and vectors
    #[serde(default)]
    pub socket_address: String,

    /// Initial membership
    #[serde(default)]
    pub view: Vec<String>,

    /// Present on founding nodes; absent when joining an existing cluster
    #[serde(default)]
    pub shard_count: Option<usize>,

    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on request bodies
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// Outbound request behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Timeout for every peer request; expiry counts as a dead node
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Pause between retries while a peer answers 503
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}
fn default_request_timeout() -> u64 {
    1000
}
fn default_retry_delay() -> u64 {
    50
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ReplicationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_address: String::new(),
            view: Vec::new(),
            shard_count: None,
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            max_body_bytes: default_max_body_bytes(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl Config {
    /// Load from `causalkv.toml` (if present) and the environment
    pub fn load() -> crate::Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load from a specific file (if present) and the environment
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("view"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check required fields and normalise the initial view
    pub fn validate(mut self) -> crate::Result<Self> {
        self.socket_address = self.socket_address.trim().to_string();
        if self.socket_address.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "socket address is required (SOCKET_ADDRESS)".into(),
            ));
        }

        if self.shard_count == Some(0) {
            return Err(crate::Error::InvalidShardCount(0));
        }

        let mut view: Vec<String> = self
            .view
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if !view.contains(&self.socket_address) {
            view.push(self.socket_address.clone());
        }
        view.sort();
        view.dedup();
        self.view = view;

        Ok(self)
    }

    /// Is this node founding the cluster (vs. joining one)?
    pub fn is_founder(&self) -> bool {
        self.shard_count.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 8090);
        assert_eq!(config.replication.request_timeout(), Duration::from_secs(1));
        assert!(!config.is_founder());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
socket_address = "10.10.0.2:8090"
view = ["10.10.0.2:8090", "10.10.0.3:8090"]
shard_count = 1

[replication]
retry_delay_ms = 10
"#
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap().validate().unwrap();
        assert_eq!(config.view.len(), 2);
        assert_eq!(config.shard_count, Some(1));
        assert_eq!(config.replication.retry_delay_ms, 10);
        assert_eq!(config.replication.request_timeout_ms, 1000);
    }

    #[test]
    fn test_validate_normalises_view() {
        let config = Config {
            socket_address: "a:1".into(),
            view: vec![" b:1 ".into(), "".into(), "b:1".into()],
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(config.view, vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(Config::default().validate().is_err());

        let zero_shards = Config {
            socket_address: "a:1".into(),
            shard_count: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            zero_shards.validate(),
            Err(crate::Error::InvalidShardCount(0))
        ));
    }
}
