//! bitgrid-cluster: membership and data ownership for bitgrid.
//!
//! This crate decides which node owns which slice and when a cluster may
//! accept data-plane traffic:
//!
//! - **Topology**: ordered node membership with a single coordinator
//! - **Lifecycle**: the `STARTING` / `NORMAL` / `RESIZING` state machine
//! - **Placement**: slice → partition → owner nodes, via rendezvous hashing
//! - **Resize jobs**: planning and tracking fragment movement after a
//!   node joins or leaves
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bitgrid_cluster::{Cluster, ClusterConfig, Node};
//!
//! let local = Node::new("node0", "127.0.0.1:10101".parse().unwrap());
//! let cluster = Cluster::new(local, ClusterConfig::default());
//! cluster.bootstrap()?;
//!
//! let owners = cluster.owners("events", 7);
//! assert_eq!(owners.len(), 1);
//! ```

mod cluster;
mod error;
mod placement;
mod resize;
mod topology;

pub use cluster::{Cluster, ClusterConfig};
pub use error::ClusterError;
pub use placement::{Placement, DEFAULT_PARTITION_COUNT, DEFAULT_REPLICA_COUNT};
pub use resize::{
    FragmentSource, IndexSlices, JobId, JobStatus, ResizeAction, ResizeInstruction, ResizeJob,
};
pub use topology::{ClusterState, Node, NodeId, Topology};
