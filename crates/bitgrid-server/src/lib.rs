//! bitgrid-server: the node-level api of a bitgrid cluster.
//!
//! Everything a node does on behalf of a client or a peer goes through
//! [`Api`]:
//!
//! - **Method gating**: each entry point is checked against the cluster
//!   state (`STARTING` / `NORMAL` / `RESIZING`)
//! - **Replication**: schema changes are applied locally, then broadcast
//!   with a bounded timeout
//! - **Resize**: the coordinator drives fragment movement when a node
//!   joins or leaves
//! - **Anti-entropy**: [`HolderSyncer`] repairs attributes and fragments
//!   that drifted between replicas
//!
//! Peer transport is pluggable through the [`Broadcaster`] and
//! [`PeerClient`] traits; query execution through [`Executor`].

pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod message;
pub mod methods;
pub mod query;
mod resize;
pub mod syncer;

pub use api::{Api, ImportRequest, ImportValueRequest, ServerInfo, DEFAULT_BROADCAST_TIMEOUT};
pub use broadcast::{Broadcaster, FragmentKey, NopBroadcaster, NopPeerClient, PeerClient};
pub use config::ServerConfig;
pub use error::{ApiError, BroadcastError, ErrorKind};
pub use message::Message;
pub use methods::ApiMethod;
pub use query::{
    ColumnAttrSet, Executor, NopExecutor, QueryOptions, QueryRequest, QueryResponse, QueryResult,
};
pub use syncer::{HolderSyncer, SyncReport};
