//! Server configuration.
//!
//! Resolution order is defaults, then the TOML file, then env vars and
//! CLI flags. This module covers the first two and the conversion into
//! the runtime types the cluster and api use.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bitgrid_cluster::{ClusterConfig, Node, NodeId, DEFAULT_PARTITION_COUNT, DEFAULT_REPLICA_COUNT};
use serde::{Deserialize, Serialize};

/// Top-level server settings, as read from the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address this node listens on and advertises to peers.
    pub bind: String,
    /// Root directory of the holder.
    pub data_dir: String,
    /// Stable node id. Empty generates a random one at startup.
    pub node_id: String,
    /// Seconds between anti-entropy passes. Zero disables them.
    pub anti_entropy_interval_secs: u64,
    pub cluster: ClusterSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:10101".into(),
            data_dir: "data".into(),
            node_id: String::new(),
            anti_entropy_interval_secs: 600,
            cluster: ClusterSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Copies kept of every slice.
    pub replicas: usize,
    pub partitions: u32,
    /// Static members as `id=host:port`.
    pub hosts: Vec<String>,
    /// Id of the initial coordinator. Empty picks the lowest id.
    pub coordinator: String,
    pub long_query_time_ms: u64,
    /// How long a broadcast may take before the caller gets an error.
    pub broadcast_timeout_ms: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICA_COUNT,
            partitions: DEFAULT_PARTITION_COUNT,
            hosts: Vec::new(),
            coordinator: String::new(),
            long_query_time_ms: 60_000,
            broadcast_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
        Self::from_toml(&text)
            .map_err(|e| format!("invalid config file '{}': {e}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| e.to_string())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        self.bind
            .parse()
            .map_err(|e| format!("invalid bind address '{}': {e}", self.bind))
    }

    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// The configured id, or a fresh random one if none is set.
    pub fn resolved_node_id(&self) -> NodeId {
        if self.node_id.is_empty() {
            NodeId::generate()
        } else {
            NodeId::new(self.node_id.clone())
        }
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.broadcast_timeout_ms)
    }

    pub fn anti_entropy_interval(&self) -> Option<Duration> {
        (self.anti_entropy_interval_secs > 0)
            .then(|| Duration::from_secs(self.anti_entropy_interval_secs))
    }

    /// Builds the cluster settings. Fails on the first bad host entry.
    pub fn cluster_config(&self) -> Result<ClusterConfig, String> {
        if self.cluster.replicas == 0 {
            return Err("replicas must be at least 1".into());
        }
        if self.cluster.partitions == 0 {
            return Err("partitions must be at least 1".into());
        }
        let hosts = self
            .cluster
            .hosts
            .iter()
            .map(|h| parse_host(h))
            .collect::<Result<Vec<_>, _>>()?;
        let coordinator = (!self.cluster.coordinator.is_empty())
            .then(|| NodeId::new(self.cluster.coordinator.clone()));
        Ok(ClusterConfig {
            replicas: self.cluster.replicas,
            partitions: self.cluster.partitions,
            long_query_time: Duration::from_millis(self.cluster.long_query_time_ms),
            hosts,
            coordinator,
            expected_nodes: 0,
        })
    }
}

/// Parses a static member entry of the form `id=host:port`.
pub fn parse_host(input: &str) -> Result<Node, String> {
    let (id, addr) = input
        .split_once('=')
        .ok_or_else(|| format!("invalid host '{input}': expected id=host:port"))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("invalid host '{input}': empty node id"));
    }
    let addr: SocketAddr = addr
        .trim()
        .parse()
        .map_err(|e| format!("invalid host '{input}': {e}"))?;
    Ok(Node::new(id, addr))
}
