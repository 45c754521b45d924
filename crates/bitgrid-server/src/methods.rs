//! Which API methods each cluster state admits.
//!
//! The tables are fixed at compile time. A method is allowed in a state
//! when it appears in [`COMMON`] or in that state's own table.

use std::fmt;

use bitgrid_cluster::ClusterState;

/// Every state-gated API entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    ClusterMessage,
    CreateField,
    CreateIndex,
    DeleteField,
    DeleteIndex,
    DeleteView,
    ExportCsv,
    FieldAttrDiff,
    FragmentBlockData,
    FragmentBlocks,
    Import,
    ImportValue,
    Index,
    IndexAttrDiff,
    MarshalFragment,
    Query,
    RecalculateCaches,
    RemoveNode,
    ResizeAbort,
    SetCoordinator,
    SliceNodes,
    UnmarshalFragment,
    Views,
}

impl ApiMethod {
    pub const ALL: [ApiMethod; 23] = [
        ApiMethod::ClusterMessage,
        ApiMethod::CreateField,
        ApiMethod::CreateIndex,
        ApiMethod::DeleteField,
        ApiMethod::DeleteIndex,
        ApiMethod::DeleteView,
        ApiMethod::ExportCsv,
        ApiMethod::FieldAttrDiff,
        ApiMethod::FragmentBlockData,
        ApiMethod::FragmentBlocks,
        ApiMethod::Import,
        ApiMethod::ImportValue,
        ApiMethod::Index,
        ApiMethod::IndexAttrDiff,
        ApiMethod::MarshalFragment,
        ApiMethod::Query,
        ApiMethod::RecalculateCaches,
        ApiMethod::RemoveNode,
        ApiMethod::ResizeAbort,
        ApiMethod::SetCoordinator,
        ApiMethod::SliceNodes,
        ApiMethod::UnmarshalFragment,
        ApiMethod::Views,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::ClusterMessage => "ClusterMessage",
            ApiMethod::CreateField => "CreateField",
            ApiMethod::CreateIndex => "CreateIndex",
            ApiMethod::DeleteField => "DeleteField",
            ApiMethod::DeleteIndex => "DeleteIndex",
            ApiMethod::DeleteView => "DeleteView",
            ApiMethod::ExportCsv => "ExportCSV",
            ApiMethod::FieldAttrDiff => "FieldAttrDiff",
            ApiMethod::FragmentBlockData => "FragmentBlockData",
            ApiMethod::FragmentBlocks => "FragmentBlocks",
            ApiMethod::Import => "Import",
            ApiMethod::ImportValue => "ImportValue",
            ApiMethod::Index => "Index",
            ApiMethod::IndexAttrDiff => "IndexAttrDiff",
            ApiMethod::MarshalFragment => "MarshalFragment",
            ApiMethod::Query => "Query",
            ApiMethod::RecalculateCaches => "RecalculateCaches",
            ApiMethod::RemoveNode => "RemoveNode",
            ApiMethod::ResizeAbort => "ResizeAbort",
            ApiMethod::SetCoordinator => "SetCoordinator",
            ApiMethod::SliceNodes => "SliceNodes",
            ApiMethod::UnmarshalFragment => "UnmarshalFragment",
            ApiMethod::Views => "Views",
        }
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed in every state, including while the cluster is starting.
pub const COMMON: &[ApiMethod] = &[
    ApiMethod::ClusterMessage,
    ApiMethod::MarshalFragment,
    ApiMethod::SetCoordinator,
];

/// Data-plane and schema operations.
pub const NORMAL: &[ApiMethod] = &[
    ApiMethod::CreateField,
    ApiMethod::CreateIndex,
    ApiMethod::DeleteField,
    ApiMethod::DeleteIndex,
    ApiMethod::DeleteView,
    ApiMethod::ExportCsv,
    ApiMethod::FieldAttrDiff,
    ApiMethod::FragmentBlockData,
    ApiMethod::FragmentBlocks,
    ApiMethod::Import,
    ApiMethod::ImportValue,
    ApiMethod::Index,
    ApiMethod::IndexAttrDiff,
    ApiMethod::Query,
    ApiMethod::RecalculateCaches,
    ApiMethod::RemoveNode,
    ApiMethod::SliceNodes,
    ApiMethod::UnmarshalFragment,
    ApiMethod::Views,
];

pub const RESIZING: &[ApiMethod] = &[ApiMethod::ResizeAbort];

/// The state-specific table, not including [`COMMON`].
pub fn state_methods(state: ClusterState) -> &'static [ApiMethod] {
    match state {
        ClusterState::Starting => &[],
        ClusterState::Normal => NORMAL,
        ClusterState::Resizing => RESIZING,
    }
}

pub fn allowed(state: ClusterState, method: ApiMethod) -> bool {
    COMMON.contains(&method) || state_methods(state).contains(&method)
}
