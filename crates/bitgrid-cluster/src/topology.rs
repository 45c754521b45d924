//! Cluster topology: node identity, membership and lifecycle state.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ClusterError;

/// Unique identifier for a cluster node.
///
/// Ids are opaque strings; membership is ordered by id so every node
/// derives the same ordering from the same member set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random node id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    pub id: NodeId,
    /// Address peers use to reach this node.
    pub addr: SocketAddr,
    /// Whether this node is the cluster coordinator.
    pub is_coordinator: bool,
}

impl Node {
    /// Creates a non-coordinator node.
    pub fn new(id: impl Into<NodeId>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
            is_coordinator: false,
        }
    }
}

/// Lifecycle state of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterState {
    /// Cluster is still forming; only bootstrap traffic is accepted.
    Starting,
    /// Fully formed; every data-plane operation is accepted.
    Normal,
    /// A membership change is being propagated.
    Resizing,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Starting => "STARTING",
            ClusterState::Normal => "NORMAL",
            ClusterState::Resizing => "RESIZING",
        }
    }

    /// Parses the wire name of a state (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STARTING" => Some(ClusterState::Starting),
            "NORMAL" => Some(ClusterState::Normal),
            "RESIZING" => Some(ClusterState::Resizing),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ordered member list of a cluster.
///
/// Nodes are kept sorted by id and unique. At most one node carries the
/// coordinator flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<Node>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a topology from an arbitrary node list. Later duplicates
    /// of the same id are dropped.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut topology = Self::new();
        for node in nodes {
            topology.insert(node);
        }
        topology
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.position(id).is_ok()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.position(id).ok().map(|i| &self.nodes[i])
    }

    /// Adds a node in id order. Returns false if the id is already present.
    pub fn insert(&mut self, node: Node) -> bool {
        match self.position(&node.id) {
            Ok(_) => false,
            Err(i) => {
                self.nodes.insert(i, node);
                true
            }
        }
    }

    /// Removes a node by id.
    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        let i = self.position(id).ok()?;
        Some(self.nodes.remove(i))
    }

    /// Returns the coordinator, if one is flagged.
    pub fn coordinator(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_coordinator)
    }

    /// Flags `id` as the only coordinator.
    pub fn set_coordinator(&mut self, id: &NodeId) -> Result<(), ClusterError> {
        if !self.contains(id) {
            return Err(ClusterError::NodeNotFound(id.clone()));
        }
        for node in &mut self.nodes {
            node.is_coordinator = node.id == *id;
        }
        Ok(())
    }

    /// Flags the member with the lowest id as coordinator and returns its
    /// id. `None` when there are no members.
    pub fn set_lowest_coordinator(&mut self) -> Option<NodeId> {
        let id = self.nodes.first()?.id.clone();
        for node in &mut self.nodes {
            node.is_coordinator = node.id == id;
        }
        Some(id)
    }

    fn position(&self, id: &NodeId) -> Result<usize, usize> {
        self.nodes.binary_search_by(|n| n.id.cmp(id))
    }
}
