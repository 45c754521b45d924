//! Errors returned by the API and by cluster transport capabilities.

use std::time::Duration;

use bitgrid_cluster::{ClusterError, ClusterState, NodeId};
use bitgrid_core::StorageError;
use thiserror::Error;

use crate::methods::ApiMethod;

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MethodNotAllowed,
    NotFound,
    AlreadyExists,
    InvalidInput,
    Ownership,
    Serialization,
    Replication,
    Internal,
}

/// Failure to deliver a message to peers.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("node {node} unreachable: {reason}")]
    Unreachable { node: NodeId, reason: String },

    #[error("node {node} rejected message: {reason}")]
    Rejected { node: NodeId, reason: String },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("method {method} not allowed in state {state}")]
    MethodNotAllowed {
        method: ApiMethod,
        state: ClusterState,
    },

    #[error("index {0} not found")]
    IndexNotFound(String),

    #[error("field {0} not found")]
    FieldNotFound(String),

    #[error("fragment not found")]
    FragmentNotFound,

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("node {node} does not own slice {slice} of index {index}")]
    SliceNotOwned {
        node: NodeId,
        index: String,
        slice: u64,
    },

    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("{context}: {source}")]
    Cluster {
        context: &'static str,
        #[source]
        source: ClusterError,
    },

    #[error("{context}: {reason}")]
    Serialization {
        context: &'static str,
        reason: String,
    },

    /// The local change was applied; peers may not have it.
    #[error(
        "sending {message} message: {source} (local change kept, peers reconcile via anti-entropy)"
    )]
    Replication {
        message: &'static str,
        #[source]
        source: BroadcastError,
    },

    #[error("executing query: {0}")]
    Query(String),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    pub(crate) fn storage(context: &'static str) -> impl FnOnce(StorageError) -> ApiError {
        move |source| ApiError::Storage { context, source }
    }

    pub(crate) fn cluster(context: &'static str) -> impl FnOnce(ClusterError) -> ApiError {
        move |source| ApiError::Cluster { context, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            ApiError::IndexNotFound(_)
            | ApiError::FieldNotFound(_)
            | ApiError::FragmentNotFound
            | ApiError::NodeNotFound(_) => ErrorKind::NotFound,
            ApiError::SliceNotOwned { .. } => ErrorKind::Ownership,
            ApiError::Storage { source, .. } => storage_kind(source),
            ApiError::Cluster { source, .. } => match source {
                ClusterError::NodeNotFound(_) => ErrorKind::NotFound,
                ClusterError::NodeExists(_) => ErrorKind::AlreadyExists,
                ClusterError::Configuration(_) => ErrorKind::Internal,
                _ => ErrorKind::InvalidInput,
            },
            ApiError::Serialization { .. } => ErrorKind::Serialization,
            ApiError::Replication { .. } => ErrorKind::Replication,
            ApiError::Query(_) => ErrorKind::InvalidInput,
            ApiError::Io { .. } => ErrorKind::Internal,
        }
    }
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        e if e.is_not_found() => ErrorKind::NotFound,
        StorageError::IndexExists(_) | StorageError::FieldExists(_) => ErrorKind::AlreadyExists,
        StorageError::Format(_) | StorageError::Corrupt(_) => ErrorKind::Serialization,
        StorageError::Io(_) => ErrorKind::Internal,
        _ => ErrorKind::InvalidInput,
    }
}
