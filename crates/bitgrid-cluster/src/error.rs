//! Error types for cluster operations.

use crate::{ClusterState, JobId, NodeId};

/// Errors that can occur during cluster operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// Node not found in the cluster.
    #[error("node {0} not found in cluster")]
    NodeNotFound(NodeId),

    /// The node is already a member.
    #[error("node {0} is already a cluster member")]
    NodeExists(NodeId),

    /// The requested state change is not a legal transition.
    #[error("cannot move cluster from {from} to {to}")]
    InvalidTransition {
        from: ClusterState,
        to: ClusterState,
    },

    /// A topology change was requested while another one is in flight.
    #[error("a resize job is already in progress")]
    ResizeInProgress,

    /// An operation needed the current resize job but there is none.
    #[error("no resize job in progress")]
    NoResizeJob,

    /// A completion arrived for a job that has already been replaced.
    #[error("resize job {0} is not the current job")]
    StaleJob(JobId),

    /// Removing the node would leave the cluster empty.
    #[error("cannot remove the last node of the cluster")]
    LastNode,

    /// Configuration error.
    #[error("invalid cluster configuration: {0}")]
    Configuration(String),
}
