//! The API façade.
//!
//! Every entry point checks the method against the cluster state first.
//! Schema changes are applied locally and then broadcast to the other
//! nodes; a broadcast failure is returned to the caller but the local
//! change stays in place. Peers that missed it converge through the
//! syncer.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitgrid_cluster::{Cluster, ClusterState, Node, NodeId};
use bitgrid_core::blocks::{self, BlockSource};
use bitgrid_core::time::from_unix_nanos;
use bitgrid_core::{
    AttrMap, AttrStore, Block, BlockData, Field, FieldOptions, Fragment, Holder, Index,
    validate_slice, IndexInfo, IndexOptions, StorageError, SLICE_WIDTH, VIEW_STANDARD,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, FragmentKey, NopBroadcaster, NopPeerClient, PeerClient};
use crate::error::{ApiError, BroadcastError};
use crate::message::Message;
use crate::methods::{self, ApiMethod};
use crate::query::{
    ColumnAttrSet, Executor, NopExecutor, QueryRequest, QueryResponse, QueryResult,
};
use crate::resize;

/// How long a broadcast may take before it counts as failed.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Static facts about this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub slice_width: u64,
}

/// Bits to load into one slice of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub index: String,
    pub field: String,
    pub slice: u64,
    pub rows: Vec<u64>,
    pub columns: Vec<u64>,
    /// Nanoseconds since the epoch, parallel to `columns`; zero means no
    /// timestamp. May be empty.
    #[serde(default)]
    pub timestamps: Vec<i64>,
}

/// Integer values to load into one slice of an int field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportValueRequest {
    pub index: String,
    pub field: String,
    pub slice: u64,
    pub columns: Vec<u64>,
    pub values: Vec<i64>,
}

pub struct Api {
    holder: Arc<Holder>,
    cluster: Arc<Cluster>,
    broadcaster: Arc<dyn Broadcaster>,
    peers: Arc<dyn PeerClient>,
    executor: Arc<dyn Executor>,
    broadcast_timeout: Duration,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("local_id", self.cluster.local_id())
            .field("broadcast_timeout", &self.broadcast_timeout)
            .finish_non_exhaustive()
    }
}

impl Api {
    /// Creates an API with no peers and no query engine attached.
    pub fn new(holder: Arc<Holder>, cluster: Arc<Cluster>) -> Self {
        Self {
            holder,
            cluster,
            broadcaster: Arc::new(NopBroadcaster),
            peers: Arc::new(NopPeerClient),
            executor: Arc::new(NopExecutor),
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_peer_client(mut self, peers: Arc<dyn PeerClient>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    pub fn holder(&self) -> &Arc<Holder> {
        &self.holder
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub(crate) fn peers(&self) -> &Arc<dyn PeerClient> {
        &self.peers
    }

    fn validate(&self, method: ApiMethod) -> Result<(), ApiError> {
        let state = self.cluster.state();
        if methods::allowed(state, method) {
            Ok(())
        } else {
            Err(ApiError::MethodNotAllowed { method, state })
        }
    }

    // -- messaging --

    /// Sends `msg` to every other node, bounded by the broadcast timeout.
    pub(crate) async fn broadcast(&self, msg: Message) -> Result<(), ApiError> {
        let name = msg.name();
        let result =
            match tokio::time::timeout(self.broadcast_timeout, self.broadcaster.send_sync(&msg))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BroadcastError::Timeout(self.broadcast_timeout)),
            };
        result.map_err(|source| {
            error!(error = %source, "problem sending {name} message");
            ApiError::Replication {
                message: name,
                source,
            }
        })
    }

    /// Sends `msg` to one node, bounded by the broadcast timeout.
    pub(crate) async fn send_to(&self, node: &Node, msg: Message) -> Result<(), ApiError> {
        let name = msg.name();
        let result = match tokio::time::timeout(
            self.broadcast_timeout,
            self.broadcaster.send_to(node, &msg),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BroadcastError::Timeout(self.broadcast_timeout)),
        };
        result.map_err(|source| {
            error!(node = %node.id, error = %source, "problem sending {name} message");
            ApiError::Replication {
                message: name,
                source,
            }
        })
    }

    /// Queues `msg` for every other node. Failures are only logged.
    async fn send_async(&self, msg: Message) {
        let name = msg.name();
        match tokio::time::timeout(self.broadcast_timeout, self.broadcaster.send_async(&msg)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "problem sending {name} message"),
            Err(_) => warn!("timed out sending {name} message"),
        }
    }

    /// Broadcasts the local cluster state and membership.
    pub(crate) async fn announce_status(&self) -> Result<(), ApiError> {
        self.broadcast(self.status_message()).await
    }

    pub(crate) fn status_message(&self) -> Message {
        Message::ClusterStatus {
            state: self.cluster.state(),
            nodes: self.cluster.nodes(),
        }
    }

    // -- lookups --

    fn lookup_index(&self, name: &str) -> Result<Arc<Index>, ApiError> {
        self.holder
            .index(name)
            .ok_or_else(|| ApiError::IndexNotFound(name.to_string()))
    }

    fn lookup_field(&self, index: &str, field: &str) -> Result<Arc<Field>, ApiError> {
        self.lookup_index(index)?
            .field(field)
            .ok_or_else(|| ApiError::FieldNotFound(field.to_string()))
    }

    fn lookup_fragment(&self, key: &FragmentKey) -> Result<Arc<Fragment>, ApiError> {
        self.holder
            .fragment(&key.index, &key.field, &key.view, key.slice)
            .ok_or(ApiError::FragmentNotFound)
    }

    fn check_owner(&self, index: &str, slice: u64) -> Result<(), ApiError> {
        let node = self.cluster.local_id();
        if self.cluster.owns_slice(node, index, slice) {
            return Ok(());
        }
        warn!("node {node} does not own slice {slice} of index {index}");
        Err(ApiError::SliceNotOwned {
            node: node.clone(),
            index: index.to_string(),
            slice,
        })
    }

    // -- queries --

    /// Runs a query and optionally attaches the attributes of every
    /// column in its row results.
    pub async fn query(&self, req: &QueryRequest) -> Result<QueryResponse, ApiError> {
        self.validate(ApiMethod::Query)?;
        let index = self.lookup_index(&req.index)?;

        let start = Instant::now();
        let results = self
            .executor
            .execute(&req.index, &req.query, &req.options.slices, &req.options)
            .await?;
        let elapsed = start.elapsed();
        if elapsed > self.cluster.long_query_time() {
            warn!(
                index = %req.index,
                query = %req.query,
                elapsed_ms = elapsed.as_millis() as u64,
                "long query"
            );
        }

        let mut response = QueryResponse {
            results,
            column_attr_sets: Vec::new(),
        };
        if req.options.column_attrs && !req.options.exclude_columns {
            let columns: BTreeSet<u64> = response
                .results
                .iter()
                .filter_map(|r| match r {
                    QueryResult::Row { columns, .. } => Some(columns.iter().copied()),
                    _ => None,
                })
                .flatten()
                .collect();
            let store = index.column_attr_store();
            response.column_attr_sets = columns
                .into_iter()
                .filter_map(|id| {
                    let attrs = store.attrs(id);
                    (!attrs.is_empty()).then_some(ColumnAttrSet { id, attrs })
                })
                .collect();
        }
        Ok(response)
    }

    // -- schema --

    pub async fn create_index(
        &self,
        name: &str,
        options: IndexOptions,
    ) -> Result<Arc<Index>, ApiError> {
        self.validate(ApiMethod::CreateIndex)?;
        let index = self
            .holder
            .create_index(name, options.clone())
            .map_err(ApiError::storage("creating index"))?;
        self.broadcast(Message::CreateIndex {
            index: name.to_string(),
            options,
        })
        .await?;
        Ok(index)
    }

    pub fn index(&self, name: &str) -> Result<Arc<Index>, ApiError> {
        self.validate(ApiMethod::Index)?;
        self.lookup_index(name)
    }

    /// Deletes an index here and on every other node. Absent indexes are
    /// not an error.
    pub async fn delete_index(&self, name: &str) -> Result<(), ApiError> {
        self.validate(ApiMethod::DeleteIndex)?;
        self.holder
            .delete_index(name)
            .map_err(ApiError::storage("deleting index"))?;
        self.broadcast(Message::DeleteIndex {
            index: name.to_string(),
        })
        .await
    }

    pub async fn create_field(
        &self,
        index: &str,
        name: &str,
        options: FieldOptions,
    ) -> Result<Arc<Field>, ApiError> {
        self.validate(ApiMethod::CreateField)?;
        let field = self
            .lookup_index(index)?
            .create_field(name, options.clone())
            .map_err(ApiError::storage("creating field"))?;
        self.broadcast(Message::CreateField {
            index: index.to_string(),
            field: name.to_string(),
            options,
        })
        .await?;
        Ok(field)
    }

    pub async fn delete_field(&self, index: &str, name: &str) -> Result<(), ApiError> {
        self.validate(ApiMethod::DeleteField)?;
        self.lookup_index(index)?
            .delete_field(name)
            .map_err(ApiError::storage("deleting field"))?;
        self.broadcast(Message::DeleteField {
            index: index.to_string(),
            field: name.to_string(),
        })
        .await
    }

    /// Deletes a view here and on every other node. Views only exist where
    /// data was written, so a missing view is not an error.
    pub async fn delete_view(&self, index: &str, field: &str, view: &str) -> Result<(), ApiError> {
        self.validate(ApiMethod::DeleteView)?;
        let f = self.lookup_field(index, field)?;
        delete_view_if_exists(&f, view)?;
        self.broadcast(Message::DeleteView {
            index: index.to_string(),
            field: field.to_string(),
            view: view.to_string(),
        })
        .await
    }

    /// Names of the views of a field.
    pub fn views(&self, index: &str, field: &str) -> Result<Vec<String>, ApiError> {
        self.validate(ApiMethod::Views)?;
        let field = self.lookup_field(index, field)?;
        Ok(field.views().iter().map(|v| v.name().to_string()).collect())
    }

    // -- imports and exports --

    /// Loads bits into one slice. The local node must own the slice; the
    /// caller is expected to send the same request to every owner.
    pub async fn import(&self, req: &ImportRequest) -> Result<(), ApiError> {
        self.validate(ApiMethod::Import)?;
        check_slice(req.slice)?;
        let index = self.lookup_index(&req.index)?;
        let field = index
            .field(&req.field)
            .ok_or_else(|| ApiError::FieldNotFound(req.field.clone()))?;
        self.check_owner(&req.index, req.slice)?;
        check_columns(&req.columns, req.slice)?;

        let timestamps: Vec<_> = req.timestamps.iter().map(|ts| from_unix_nanos(*ts)).collect();
        let before = index.max_slice();
        if let Err(e) = field.import(&req.rows, &req.columns, &timestamps) {
            error!(
                "import error: index={}, field={}, slice={}, columns={}, err={e}",
                req.index,
                req.field,
                req.slice,
                req.columns.len()
            );
            return Err(ApiError::storage("importing bits")(e));
        }
        self.announce_slice(&index, before, req.slice).await;
        Ok(())
    }

    /// Loads integer values into one slice of an int field.
    pub async fn import_value(&self, req: &ImportValueRequest) -> Result<(), ApiError> {
        self.validate(ApiMethod::ImportValue)?;
        check_slice(req.slice)?;
        let index = self.lookup_index(&req.index)?;
        let field = index
            .field(&req.field)
            .ok_or_else(|| ApiError::FieldNotFound(req.field.clone()))?;
        self.check_owner(&req.index, req.slice)?;
        check_columns(&req.columns, req.slice)?;

        let before = index.max_slice();
        if let Err(e) = field.import_value(&req.columns, &req.values) {
            error!(
                "import error: index={}, field={}, slice={}, columns={}, err={e}",
                req.index,
                req.field,
                req.slice,
                req.columns.len()
            );
            return Err(ApiError::storage("importing values")(e));
        }
        self.announce_slice(&index, before, req.slice).await;
        Ok(())
    }

    async fn announce_slice(&self, index: &Index, before: u64, slice: u64) {
        if slice > before {
            debug!(index = index.name(), slice, "announcing new max slice");
            self.send_async(Message::CreateSlice {
                index: index.name().to_string(),
                slice,
            })
            .await;
        }
    }

    /// Writes the standard view of one slice as `row,column` lines.
    pub fn export_csv<W: Write>(
        &self,
        index: &str,
        field: &str,
        slice: u64,
        w: &mut W,
    ) -> Result<(), ApiError> {
        self.validate(ApiMethod::ExportCsv)?;
        self.lookup_field(index, field)?;
        self.check_owner(index, slice)?;
        let fragment = self.lookup_fragment(&FragmentKey::new(index, field, VIEW_STANDARD, slice))?;
        fragment
            .for_each_bit(|row, column| writeln!(w, "{row},{column}"))
            .and_then(|_| w.flush())
            .map_err(|source| ApiError::Io {
                context: "writing csv",
                source,
            })
    }

    // -- fragments --

    /// Serialized contents of a fragment.
    pub fn marshal_fragment(&self, key: &FragmentKey) -> Result<Bytes, ApiError> {
        self.validate(ApiMethod::MarshalFragment)?;
        let fragment = self.lookup_fragment(key)?;
        let mut buf = Vec::new();
        fragment
            .write_to(&mut buf)
            .map_err(ApiError::storage("marshaling fragment"))?;
        Ok(Bytes::from(buf))
    }

    /// Replaces a fragment with serialized contents, creating the view and
    /// fragment if needed.
    pub fn unmarshal_fragment(&self, key: &FragmentKey, data: &[u8]) -> Result<(), ApiError> {
        self.validate(ApiMethod::UnmarshalFragment)?;
        self.restore_fragment(key, data)
    }

    pub(crate) fn restore_fragment(&self, key: &FragmentKey, mut data: &[u8]) -> Result<(), ApiError> {
        check_slice(key.slice)?;
        let field = self.lookup_field(&key.index, &key.field)?;
        let fragment = field
            .create_view_if_not_exists(&key.view)
            .and_then(|view| view.create_fragment_if_not_exists(key.slice))
            .map_err(ApiError::storage("creating fragment"))?;
        fragment
            .read_from(&mut data)
            .map_err(ApiError::storage("unmarshaling fragment"))?;
        self.holder.set_remote_max_slice(&key.index, key.slice);
        Ok(())
    }

    pub fn fragment_blocks(&self, key: &FragmentKey) -> Result<Vec<Block>, ApiError> {
        self.validate(ApiMethod::FragmentBlocks)?;
        Ok(self.lookup_fragment(key)?.blocks())
    }

    pub fn fragment_block_data(&self, key: &FragmentKey, block: u64) -> Result<BlockData, ApiError> {
        self.validate(ApiMethod::FragmentBlockData)?;
        Ok(self.lookup_fragment(key)?.block_data(block))
    }

    // -- attributes --

    /// Column attributes of every block where `blocks` differs from the
    /// local store.
    pub fn index_attr_diff(&self, index: &str, blocks: &[Block]) -> Result<AttrMap, ApiError> {
        self.validate(ApiMethod::IndexAttrDiff)?;
        let index = self.lookup_index(index)?;
        Ok(attr_diff(index.column_attr_store(), blocks))
    }

    /// Row attributes of every block where `blocks` differs from the
    /// local store.
    pub fn field_attr_diff(
        &self,
        index: &str,
        field: &str,
        blocks: &[Block],
    ) -> Result<AttrMap, ApiError> {
        self.validate(ApiMethod::FieldAttrDiff)?;
        let field = self.lookup_field(index, field)?;
        Ok(attr_diff(field.row_attr_store(), blocks))
    }

    // -- cluster --

    /// Owners of a slice, primary first.
    pub fn slice_nodes(&self, index: &str, slice: u64) -> Result<Vec<Node>, ApiError> {
        self.validate(ApiMethod::SliceNodes)?;
        Ok(self.cluster.owners(index, slice))
    }

    pub async fn recalculate_caches(&self) -> Result<(), ApiError> {
        self.validate(ApiMethod::RecalculateCaches)?;
        self.holder.recalculate_caches();
        self.broadcast(Message::RecalculateCaches).await
    }

    /// Makes `id` the coordinator. Returns the previous and new
    /// coordinator.
    ///
    /// If `id` is the local node the change is applied here and
    /// broadcast; otherwise the target node is told and announces itself.
    pub async fn set_coordinator(&self, id: &NodeId) -> Result<(Option<Node>, Node), ApiError> {
        self.validate(ApiMethod::SetCoordinator)?;
        let node = self
            .cluster
            .node_by_id(id)
            .ok_or_else(|| ApiError::NodeNotFound(id.clone()))?;
        let old = self.cluster.coordinator();
        if id == self.cluster.local_id() {
            self.cluster
                .set_coordinator(id)
                .map_err(ApiError::cluster("setting coordinator"))?;
            self.broadcast(Message::SetCoordinator { node: node.clone() })
                .await?;
        } else {
            self.send_to(&node, Message::SetCoordinator { node: node.clone() })
                .await?;
        }
        Ok((old, node))
    }

    /// Removes a node from the cluster. On the coordinator this starts a
    /// resize job; elsewhere the request is forwarded to the coordinator.
    pub async fn remove_node(self: &Arc<Self>, id: &NodeId) -> Result<Node, ApiError> {
        self.validate(ApiMethod::RemoveNode)?;
        let node = self
            .cluster
            .node_by_id(id)
            .ok_or_else(|| ApiError::NodeNotFound(id.clone()))?;
        if self.cluster.is_coordinator() {
            self.cluster
                .node_leave(id)
                .map_err(ApiError::cluster("removing node"))?;
            resize::spawn_job(Arc::clone(self));
        } else {
            let coordinator = self
                .cluster
                .coordinator()
                .ok_or_else(|| ApiError::Cluster {
                    context: "removing node",
                    source: bitgrid_cluster::ClusterError::Configuration(
                        "no coordinator".into(),
                    ),
                })?;
            self.send_to(&coordinator, Message::NodeLeave { node: id.clone() })
                .await?;
        }
        Ok(node)
    }

    /// Cancels the running resize and returns the cluster to `NORMAL`.
    pub async fn resize_abort(&self) -> Result<(), ApiError> {
        self.validate(ApiMethod::ResizeAbort)?;
        let job = self
            .cluster
            .abort_job("aborted by request")
            .map_err(ApiError::cluster("aborting resize"))?;
        if job.is_some() {
            self.announce_status().await?;
        }
        Ok(())
    }

    /// Asks `coordinator` to add this node to the cluster.
    pub async fn join_cluster(&self, coordinator: &Node) -> Result<(), ApiError> {
        let local = self
            .cluster
            .local_node()
            .ok_or_else(|| ApiError::NodeNotFound(self.cluster.local_id().clone()))?;
        info!(coordinator = %coordinator.id, "asking to join cluster");
        self.send_to(coordinator, Message::NodeJoin { node: local })
            .await
    }

    // -- replicated messages --

    /// Applies a message sent by another node. Nothing is re-broadcast,
    /// except that a node told it is the new coordinator announces itself.
    pub async fn receive_message(self: &Arc<Self>, msg: Message) -> Result<(), ApiError> {
        self.validate(ApiMethod::ClusterMessage)?;
        debug!(message = msg.name(), "received cluster message");
        match msg {
            Message::CreateIndex { index, options } => {
                self.holder
                    .create_index_if_not_exists(&index, options)
                    .map_err(ApiError::storage("creating index"))?;
            }
            Message::DeleteIndex { index } => {
                self.holder
                    .delete_index(&index)
                    .map_err(ApiError::storage("deleting index"))?;
            }
            Message::CreateField {
                index,
                field,
                options,
            } => {
                self.lookup_index(&index)?
                    .create_field_if_not_exists(&field, options)
                    .map_err(ApiError::storage("creating field"))?;
            }
            Message::DeleteField { index, field } => {
                if let Some(index) = self.holder.index(&index) {
                    index
                        .delete_field(&field)
                        .map_err(ApiError::storage("deleting field"))?;
                }
            }
            Message::DeleteView { index, field, view } => {
                if let Some(field) = self.holder.field(&index, &field) {
                    delete_view_if_exists(&field, &view)?;
                }
            }
            Message::SetCoordinator { node } => {
                self.cluster
                    .set_coordinator(&node.id)
                    .map_err(ApiError::cluster("setting coordinator"))?;
                if node.id == *self.cluster.local_id() {
                    self.broadcast(Message::SetCoordinator { node }).await?;
                }
            }
            Message::RecalculateCaches => self.holder.recalculate_caches(),
            Message::CreateSlice { index, slice } => {
                check_slice(slice)?;
                self.holder.set_remote_max_slice(&index, slice);
            }
            Message::NodeJoin { node } => self.handle_join(node).await?,
            Message::NodeLeave { node } => {
                if !self.cluster.is_coordinator() {
                    warn!(node = %node, "ignoring leave request: not the coordinator");
                    return Ok(());
                }
                self.cluster
                    .node_leave(&node)
                    .map_err(ApiError::cluster("removing node"))?;
                resize::spawn_job(Arc::clone(self));
            }
            Message::ResizeInstruction {
                instruction,
                schema,
            } => resize::spawn_follow(Arc::clone(self), instruction, schema),
            Message::ResizeInstructionComplete { job, node, error } => {
                resize::instruction_complete(self, job, &node, error).await?;
            }
            Message::ClusterStatus { state, nodes } => self.cluster.apply_status(state, nodes),
        }
        Ok(())
    }

    async fn handle_join(self: &Arc<Self>, node: Node) -> Result<(), ApiError> {
        if !self.cluster.is_coordinator() {
            warn!(node = %node.id, "ignoring join request: not the coordinator");
            return Ok(());
        }
        if self.cluster.node_by_id(&node.id).is_some() {
            // a restarted member: just tell it where things stand
            return self.send_to(&node, self.status_message()).await;
        }
        if self.cluster.state() == ClusterState::Starting {
            self.cluster
                .add_host(node)
                .map_err(ApiError::cluster("adding node"))?;
            return self.announce_status().await;
        }
        self.cluster
            .node_join(node)
            .map_err(ApiError::cluster("adding node"))?;
        resize::spawn_job(Arc::clone(self));
        Ok(())
    }

    /// Creates every index, field and view of `schema` that is missing.
    pub(crate) fn apply_schema(&self, schema: &[IndexInfo]) -> Result<(), ApiError> {
        for info in schema {
            let index = self
                .holder
                .create_index_if_not_exists(&info.name, info.options.clone())
                .map_err(ApiError::storage("creating index"))?;
            for field_info in &info.fields {
                let field = index
                    .create_field_if_not_exists(&field_info.name, field_info.options.clone())
                    .map_err(ApiError::storage("creating field"))?;
                for view in &field_info.views {
                    field
                        .create_view_if_not_exists(view)
                        .map_err(ApiError::storage("creating view"))?;
                }
            }
        }
        Ok(())
    }

    // -- introspection, not state gated --

    pub fn schema(&self) -> Vec<IndexInfo> {
        self.holder.schema()
    }

    pub fn hosts(&self) -> Vec<Node> {
        self.cluster.nodes()
    }

    pub fn state(&self) -> ClusterState {
        self.cluster.state()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn local_id(&self) -> &NodeId {
        self.cluster.local_id()
    }

    pub fn max_slices(&self) -> BTreeMap<String, u64> {
        self.holder.max_slices()
    }

    pub fn long_query_time(&self) -> Duration {
        self.cluster.long_query_time()
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            slice_width: SLICE_WIDTH,
        }
    }
}

fn delete_view_if_exists(field: &Field, view: &str) -> Result<(), ApiError> {
    match field.delete_view(view) {
        Ok(()) | Err(StorageError::ViewNotFound(_)) => Ok(()),
        Err(e) => Err(ApiError::storage("deleting view")(e)),
    }
}

fn check_slice(slice: u64) -> Result<(), ApiError> {
    validate_slice(slice).map_err(ApiError::storage("checking slice"))
}

fn check_columns(columns: &[u64], slice: u64) -> Result<(), ApiError> {
    match columns.iter().find(|c| *c / SLICE_WIDTH != slice) {
        Some(&column) => Err(ApiError::storage("importing")(
            StorageError::ColumnOutOfSlice { column, slice },
        )),
        None => Ok(()),
    }
}

fn attr_diff(store: &AttrStore, remote: &[Block]) -> AttrMap {
    let local = store.blocks();
    let mut out = AttrMap::new();
    for id in blocks::diff(&local, remote) {
        out.extend(store.block_data(id));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bitgrid_cluster::ClusterConfig;
    use bitgrid_core::{AttrValue, Attrs, TimeQuantum};

    use crate::error::ErrorKind;
    use crate::query::QueryOptions;

    #[derive(Default)]
    struct Recorder {
        sync: Mutex<Vec<Message>>,
        sent_async: Mutex<Vec<Message>>,
        sent_to: Mutex<Vec<(NodeId, Message)>>,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl Broadcaster for Recorder {
        async fn send_sync(&self, msg: &Message) -> Result<(), BroadcastError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(BroadcastError::Unreachable {
                    node: NodeId::new("b"),
                    reason: "connection refused".into(),
                });
            }
            self.sync.lock().unwrap().push(msg.clone());
            Ok(())
        }

        async fn send_async(&self, msg: &Message) -> Result<(), BroadcastError> {
            self.sent_async.lock().unwrap().push(msg.clone());
            Ok(())
        }

        async fn send_to(&self, node: &Node, msg: &Message) -> Result<(), BroadcastError> {
            self.sent_to.lock().unwrap().push((node.id.clone(), msg.clone()));
            Ok(())
        }
    }

    struct RowsExecutor(Vec<u64>);

    #[async_trait]
    impl Executor for RowsExecutor {
        async fn execute(
            &self,
            _index: &str,
            _query: &str,
            _slices: &[u64],
            _options: &QueryOptions,
        ) -> Result<Vec<QueryResult>, ApiError> {
            Ok(vec![
                QueryResult::Row {
                    columns: self.0.clone(),
                    attrs: Attrs::new(),
                },
                QueryResult::Count(self.0.len() as u64),
            ])
        }
    }

    fn node(id: &str, port: u16) -> Node {
        Node::new(id, format!("127.0.0.1:{port}").parse().unwrap())
    }

    /// An api on node "a" of a cluster with the given members.
    fn setup(
        dir: &tempfile::TempDir,
        members: &[&str],
        recorder: Arc<Recorder>,
    ) -> Arc<Api> {
        let hosts: Vec<Node> = members
            .iter()
            .enumerate()
            .map(|(i, id)| node(id, 10101 + i as u16))
            .collect();
        let cluster = Cluster::new(
            hosts[0].clone(),
            ClusterConfig {
                hosts,
                ..Default::default()
            },
        );
        cluster.bootstrap().unwrap();
        let holder = Holder::open(dir.path()).unwrap();
        Arc::new(
            Api::new(Arc::new(holder), Arc::new(cluster))
                .with_broadcaster(recorder)
                .with_executor(Arc::new(RowsExecutor(vec![1, 2, 3]))),
        )
    }

    fn single(dir: &tempfile::TempDir) -> (Arc<Api>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (setup(dir, &["a"], Arc::clone(&recorder)), recorder)
    }

    #[tokio::test]
    async fn create_index_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let (api, recorder) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        let sent = recorder.sync.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].name(), "CreateIndex");
        assert!(matches!(&sent[1], Message::CreateField { field, .. } if field == "f"));
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        let err = api
            .create_index("i", IndexOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert!(err.to_string().starts_with("creating index"));
    }

    #[tokio::test]
    async fn broadcast_failure_keeps_local_change() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let api = setup(&dir, &["a"], recorder);
        let err = api
            .create_index("i", IndexOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Replication);
        assert!(err.to_string().starts_with("sending CreateIndex message"));
        assert!(api.holder().index("i").is_some());
    }

    #[tokio::test]
    async fn broadcast_timeout_is_replication_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder {
            hang: true,
            ..Default::default()
        });
        let hosts = vec![node("a", 1)];
        let cluster = Cluster::new(hosts[0].clone(), ClusterConfig::default());
        cluster.bootstrap().unwrap();
        let api = Api::new(
            Arc::new(Holder::open(dir.path()).unwrap()),
            Arc::new(cluster),
        )
        .with_broadcaster(recorder)
        .with_broadcast_timeout(Duration::from_millis(20));

        let err = api
            .create_index("i", IndexOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Replication {
                source: BroadcastError::Timeout(_),
                ..
            }
        ));
        assert!(api.holder().index("i").is_some());
    }

    #[tokio::test]
    async fn delete_missing_field_and_view_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.delete_field("i", "nope").await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        api.delete_view("i", "f", "standard_2020").await.unwrap();
        assert_eq!(
            api.delete_field("x", "f").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn import_and_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let (api, recorder) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        api.import(&ImportRequest {
            index: "i".into(),
            field: "f".into(),
            slice: 0,
            rows: vec![2, 1],
            columns: vec![9, 5],
            timestamps: vec![],
        })
        .await
        .unwrap();

        let mut out = Vec::new();
        api.export_csv("i", "f", 0, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1,5\n2,9\n");
        // slice 0 does not extend the index
        assert!(recorder.sent_async.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_announces_new_slice() {
        let dir = tempfile::tempdir().unwrap();
        let (api, recorder) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        api.import(&ImportRequest {
            index: "i".into(),
            field: "f".into(),
            slice: 3,
            rows: vec![1],
            columns: vec![3 * SLICE_WIDTH + 1],
            timestamps: vec![],
        })
        .await
        .unwrap();
        let sent = recorder.sent_async.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![Message::CreateSlice {
                index: "i".into(),
                slice: 3
            }]
        );
    }

    #[tokio::test]
    async fn import_zero_timestamp_skips_time_views() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        let quantum: TimeQuantum = "Y".parse().unwrap();
        api.create_field("i", "t", FieldOptions::time(quantum))
            .await
            .unwrap();
        // 2021-01-01T00:00:00Z
        let ts = 1_609_459_200_000_000_000;
        api.import(&ImportRequest {
            index: "i".into(),
            field: "t".into(),
            slice: 0,
            rows: vec![1, 2],
            columns: vec![10, 20],
            timestamps: vec![0, ts],
        })
        .await
        .unwrap();

        assert_eq!(api.views("i", "t").unwrap(), vec!["standard", "standard_2021"]);
        let year = api.holder().fragment("i", "t", "standard_2021", 0).unwrap();
        assert!(year.contains(2, 20));
        assert!(!year.contains(1, 10));
    }

    #[tokio::test]
    async fn import_rejects_columns_outside_slice() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        let err = api
            .import(&ImportRequest {
                index: "i".into(),
                field: "f".into(),
                slice: 0,
                rows: vec![1],
                columns: vec![SLICE_WIDTH],
                timestamps: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn import_requires_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let api = setup(&dir, &["a", "b"], Arc::new(Recorder::default()));
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        let local = api.local_id().clone();
        let slice = (0..64)
            .find(|s| !api.cluster().owns_slice(&local, "i", *s))
            .unwrap();

        let err = api
            .import(&ImportRequest {
                index: "i".into(),
                field: "f".into(),
                slice,
                rows: vec![1],
                columns: vec![slice * SLICE_WIDTH],
                timestamps: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ownership);
        assert!(api.holder().fragment("i", "f", "standard", slice).is_none());

        let mut out = Vec::new();
        let err = api.export_csv("i", "f", slice, &mut out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ownership);
    }

    #[tokio::test]
    async fn import_value_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "n", FieldOptions::int(-50, 50))
            .await
            .unwrap();
        api.import_value(&ImportValueRequest {
            index: "i".into(),
            field: "n".into(),
            slice: 0,
            columns: vec![1, 2],
            values: vec![-50, 42],
        })
        .await
        .unwrap();
        let field = api.holder().field("i", "n").unwrap();
        assert_eq!(field.value(2).unwrap(), Some(42));
        assert_eq!(field.value(1).unwrap(), Some(-50));
    }

    #[tokio::test]
    async fn query_attaches_column_attrs() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        let index = api.create_index("i", IndexOptions::default()).await.unwrap();
        let mut attrs = Attrs::new();
        attrs.insert("name".into(), AttrValue::from("one"));
        index.column_attr_store().set_attrs(1, attrs.clone()).unwrap();
        index.column_attr_store().set_attrs(3, attrs.clone()).unwrap();
        index.column_attr_store().set_attrs(7, attrs.clone()).unwrap();

        let mut req = QueryRequest::new("i", "Bitmap(row=1, field=f)");
        let plain = api.query(&req).await.unwrap();
        assert!(plain.column_attr_sets.is_empty());
        assert_eq!(plain.results.len(), 2);

        req.options.column_attrs = true;
        let resp = api.query(&req).await.unwrap();
        let ids: Vec<u64> = resp.column_attr_sets.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);

        req.options.exclude_columns = true;
        assert!(api.query(&req).await.unwrap().column_attr_sets.is_empty());
    }

    #[tokio::test]
    async fn query_unknown_index() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        let err = api.query(&QueryRequest::new("nope", "Count()")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn resizing_blocks_query_until_abort() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let api = setup(&dir, &["a", "b"], Arc::clone(&recorder));
        api.create_index("i", IndexOptions::default()).await.unwrap();
        let req = QueryRequest::new("i", "Count()");

        api.cluster().node_leave(&NodeId::new("b")).unwrap();
        assert_eq!(api.state(), ClusterState::Resizing);
        let err = api.query(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotAllowed);
        assert_eq!(
            err.to_string(),
            "method Query not allowed in state RESIZING"
        );

        api.resize_abort().await.unwrap();
        assert_eq!(api.state(), ClusterState::Normal);
        api.query(&req).await.unwrap();
        assert_eq!(api.hosts().len(), 2);
        let last = recorder.sync.lock().unwrap().last().cloned().unwrap();
        assert!(matches!(
            last,
            Message::ClusterStatus {
                state: ClusterState::Normal,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn resize_abort_needs_resizing() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        let err = api.resize_abort().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotAllowed);
    }

    #[tokio::test]
    async fn starting_cluster_only_takes_common_methods() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Cluster::new(node("a", 1), ClusterConfig::default());
        let api = Arc::new(Api::new(
            Arc::new(Holder::open(dir.path()).unwrap()),
            Arc::new(cluster),
        ));
        let err = api
            .create_index("i", IndexOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotAllowed);
        api.receive_message(Message::CreateIndex {
            index: "i".into(),
            options: IndexOptions::default(),
        })
        .await
        .unwrap();
        assert!(api.holder().index("i").is_some());
        assert_eq!(api.schema().len(), 1);
    }

    #[tokio::test]
    async fn received_messages_are_not_rebroadcast() {
        let dir = tempfile::tempdir().unwrap();
        let (api, recorder) = single(&dir);
        api.receive_message(Message::CreateIndex {
            index: "i".into(),
            options: IndexOptions::default(),
        })
        .await
        .unwrap();
        api.receive_message(Message::CreateField {
            index: "i".into(),
            field: "f".into(),
            options: FieldOptions::default(),
        })
        .await
        .unwrap();
        api.receive_message(Message::CreateSlice {
            index: "i".into(),
            slice: 9,
        })
        .await
        .unwrap();
        api.receive_message(Message::DeleteField {
            index: "i".into(),
            field: "f".into(),
        })
        .await
        .unwrap();

        assert!(recorder.sync.lock().unwrap().is_empty());
        assert_eq!(api.max_slices().get("i"), Some(&9));
        assert!(api.holder().field("i", "f").is_none());
    }

    #[tokio::test]
    async fn set_coordinator_remote_is_point_to_point() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let api = setup(&dir, &["a", "b"], Arc::clone(&recorder));
        let (old, new) = api.set_coordinator(&NodeId::new("b")).await.unwrap();
        assert_eq!(old.unwrap().id, NodeId::new("a"));
        assert_eq!(new.id, NodeId::new("b"));
        // applied by b, not here
        assert!(api.cluster().is_coordinator());
        let sent = recorder.sent_to.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, NodeId::new("b"));

        let err = api.set_coordinator(&NodeId::new("z")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn coordinator_message_for_local_node_is_announced() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let api = setup(&dir, &["a", "b"], Arc::clone(&recorder));
        api.receive_message(Message::SetCoordinator { node: node("b", 10102) })
            .await
            .unwrap();
        assert!(!api.cluster().is_coordinator());
        assert!(recorder.sync.lock().unwrap().is_empty());

        api.receive_message(Message::SetCoordinator { node: node("a", 10101) })
            .await
            .unwrap();
        assert!(api.cluster().is_coordinator());
        assert_eq!(recorder.sync.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn index_attr_diff_returns_differing_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        let index = api.create_index("i", IndexOptions::default()).await.unwrap();
        let other = AttrStore::open(dir.path().join("other.data")).unwrap();

        let attrs = |v: i64| -> Attrs {
            let mut a = Attrs::new();
            a.insert("v".into(), AttrValue::Int(v));
            a
        };
        for block in [1u64, 3, 5, 7] {
            let id = block * 100 + 4;
            index.column_attr_store().set_attrs(id, attrs(1)).unwrap();
            let v = if block == 3 || block == 7 { 2 } else { 1 };
            other.set_attrs(id, attrs(v)).unwrap();
        }

        let diff = api.index_attr_diff("i", &other.blocks()).unwrap();
        let ids: Vec<u64> = diff.keys().copied().collect();
        assert_eq!(ids, vec![304, 704]);
        assert_eq!(diff[&304], attrs(1));
    }

    #[tokio::test]
    async fn fragment_marshal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        api.create_field("i", "g", FieldOptions::default())
            .await
            .unwrap();
        api.import(&ImportRequest {
            index: "i".into(),
            field: "f".into(),
            slice: 0,
            rows: vec![1, 150, 150],
            columns: vec![3, 4, 5],
            timestamps: vec![],
        })
        .await
        .unwrap();

        let src = FragmentKey::new("i", "f", VIEW_STANDARD, 0);
        let dst = FragmentKey::new("i", "g", VIEW_STANDARD, 0);
        let data = api.marshal_fragment(&src).unwrap();
        api.unmarshal_fragment(&dst, &data).unwrap();
        assert_eq!(
            api.fragment_blocks(&src).unwrap(),
            api.fragment_blocks(&dst).unwrap()
        );
        let block = api.fragment_block_data(&dst, 1).unwrap();
        assert_eq!(block.rows, vec![150, 150]);
        assert_eq!(block.columns, vec![4, 5]);

        let missing = FragmentKey::new("i", "f", VIEW_STANDARD, 9);
        assert_eq!(
            api.marshal_fragment(&missing).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            api.unmarshal_fragment(&dst, b"garbage").unwrap_err().kind(),
            ErrorKind::Serialization
        );
    }

    async fn index_with_bits(api: &Api) -> Bytes {
        api.create_index("i", IndexOptions::default()).await.unwrap();
        api.create_field("i", "f", FieldOptions::default())
            .await
            .unwrap();
        api.import(&ImportRequest {
            index: "i".into(),
            field: "f".into(),
            slice: 0,
            rows: vec![1],
            columns: vec![5],
            timestamps: vec![],
        })
        .await
        .unwrap();
        api.marshal_fragment(&FragmentKey::new("i", "f", VIEW_STANDARD, 0))
            .unwrap()
    }

    #[tokio::test]
    async fn view_names_stay_inside_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let (api, recorder) = single(&dir);
        let data = index_with_bits(&api).await;
        let index_dir = dir.path().join("i");
        let sent = recorder.sync.lock().unwrap().len();

        let escape = FragmentKey::new("i", "f", "../../..", 0);
        let err = api.unmarshal_fragment(&escape, &data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!dir.path().join("fragments").exists());

        let err = api.delete_view("i", "f", "../../..").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = api
            .receive_message(Message::DeleteView {
                index: "i".into(),
                field: "f".into(),
                view: "..".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(recorder.sync.lock().unwrap().len(), sent);

        let schema = vec![IndexInfo {
            name: "i".into(),
            options: IndexOptions::default(),
            fields: vec![bitgrid_core::FieldInfo {
                name: "f".into(),
                options: FieldOptions::default(),
                views: vec!["../../../x".into()],
            }],
        }];
        let err = api.apply_schema(&schema).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert!(index_dir.exists());
        assert_eq!(api.views("i", "f").unwrap(), vec![VIEW_STANDARD]);
        assert!(api.holder().fragment("i", "f", VIEW_STANDARD, 0).unwrap().contains(1, 5));
    }

    #[tokio::test]
    async fn unaddressable_slices_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (api, recorder) = single(&dir);
        let data = index_with_bits(&api).await;
        let huge = 1u64 << 50;

        let key = FragmentKey::new("i", "f", VIEW_STANDARD, huge);
        let err = api.unmarshal_fragment(&key, &data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = api
            .receive_message(Message::CreateSlice {
                index: "i".into(),
                slice: huge,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = api
            .import(&ImportRequest {
                index: "i".into(),
                field: "f".into(),
                slice: huge,
                rows: vec![],
                columns: vec![],
                timestamps: vec![],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(recorder.sent_async.lock().unwrap().is_empty());

        assert_eq!(api.max_slices().get("i"), Some(&0));
        let mut csv = Vec::new();
        api.export_csv("i", "f", 0, &mut csv).unwrap();
        assert_eq!(csv, b"1,5\n");
    }

    #[tokio::test]
    async fn introspection() {
        let dir = tempfile::tempdir().unwrap();
        let (api, _) = single(&dir);
        assert_eq!(api.info().slice_width, SLICE_WIDTH);
        assert_eq!(api.local_id(), &NodeId::new("a"));
        assert_eq!(api.state(), ClusterState::Normal);
        assert!(!api.version().is_empty());
        assert_eq!(api.long_query_time(), Duration::from_secs(60));
        assert_eq!(api.slice_nodes("i", 0).unwrap().len(), 1);
    }
}
