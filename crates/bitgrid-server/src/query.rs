//! Query execution capability and result types.
//!
//! Parsing and executing the query language is left to an [`Executor`];
//! the API only validates, times and decorates the results.

use async_trait::async_trait;
use bitgrid_core::{Attrs, Pair};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Flags controlling how a query runs and what its response carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Restrict execution to these slices; empty means all.
    pub slices: Vec<u64>,
    /// Attach column attributes of returned rows.
    pub column_attrs: bool,
    /// Omit column ids from row results.
    pub exclude_columns: bool,
    /// Omit row attributes from row results.
    pub exclude_row_attrs: bool,
    /// The query was forwarded by another node.
    pub remote: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub index: String,
    pub query: String,
    #[serde(default)]
    pub options: QueryOptions,
}

impl QueryRequest {
    pub fn new(index: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            query: query.into(),
            options: QueryOptions::default(),
        }
    }
}

/// Result of one call in a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryResult {
    Row { columns: Vec<u64>, attrs: Attrs },
    Count(u64),
    Bool(bool),
    Pairs(Vec<Pair>),
    Value { value: i64, count: u64 },
}

/// Attributes of one column returned alongside the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAttrSet {
    pub id: u64,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub column_attr_sets: Vec<ColumnAttrSet>,
}

/// Runs a query against local data.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        index: &str,
        query: &str,
        slices: &[u64],
        options: &QueryOptions,
    ) -> Result<Vec<QueryResult>, ApiError>;
}

/// Executor for nodes without a query engine: every query is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopExecutor;

#[async_trait]
impl Executor for NopExecutor {
    async fn execute(
        &self,
        _index: &str,
        _query: &str,
        _slices: &[u64],
        _options: &QueryOptions,
    ) -> Result<Vec<QueryResult>, ApiError> {
        Err(ApiError::Query("no query executor configured".into()))
    }
}
