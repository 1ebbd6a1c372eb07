//! Configuration schema and loader for blocksync clusters.
//!
//! One YAML document describes the whole cluster: every metadata node's
//! name and listen address, which one is the leader (fixed for the
//! process lifetime; there is no election), and the block store's
//! address. Each server process loads the same document and finds
//! itself in it by name.

use blocksync_common::NodeAddr;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;

/// Top-level cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// All metadata nodes, leader included.
    pub nodes: Vec<NodeAddr>,

    /// Name of the node that accepts writes and owns the block store
    /// connection. Must match an entry in `nodes`.
    pub leader: String,

    /// The block store server's listen address.
    pub block_store: SocketAddr,

    /// Replication tunables.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// How often the leader nudges every follower with a Restore call.
    #[serde(default = "default_restore_interval_secs")]
    pub restore_interval_secs: u64,

    /// Deadline for a single follower push (Append).
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,

    /// Deadline for other node-to-node and block-store RPCs.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            restore_interval_secs: default_restore_interval_secs(),
            push_timeout_ms: default_push_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

// --- Defaults ---

fn default_restore_interval_secs() -> u64 {
    5
}
fn default_push_timeout_ms() -> u64 {
    1000
}
fn default_rpc_timeout_ms() -> u64 {
    5000
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ClusterConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("nodes must not be empty".into()));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(ConfigError::Invalid("node name must not be empty".into()));
            }
            if !names.insert(node.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate node name: {}",
                    node.name
                )));
            }
        }

        if self.node(&self.leader).is_none() {
            return Err(ConfigError::Invalid(format!(
                "leader '{}' is not listed in nodes",
                self.leader
            )));
        }

        if self.replication.restore_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "replication.restore_interval_secs must be > 0".into(),
            ));
        }
        if self.replication.push_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "replication.push_timeout_ms must be > 0".into(),
            ));
        }
        if self.replication.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "replication.rpc_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Look up a node entry by name.
    pub fn node(&self, name: &str) -> Option<&NodeAddr> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Whether the named node is the configured leader.
    pub fn is_leader(&self, name: &str) -> bool {
        self.leader == name
    }

    /// Every node except the named one (the leader's follower set).
    pub fn peers_of(&self, name: &str) -> Vec<NodeAddr> {
        self.nodes
            .iter()
            .filter(|n| n.name != name)
            .cloned()
            .collect()
    }

    /// The leader's address entry. Only valid after `validate()`.
    pub fn leader_addr(&self) -> Option<&NodeAddr> {
        self.node(&self.leader)
    }
}

/// Load a `ClusterConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<ClusterConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `ClusterConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<ClusterConfig, ConfigError> {
    let config: ClusterConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
