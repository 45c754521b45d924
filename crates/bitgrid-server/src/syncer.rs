//! Anti-entropy: pulling data this node is missing from its replicas.
//!
//! Each pass walks every index and compares block checksums with the
//! other members. Attribute blocks that differ are fetched and merged
//! (last write wins per key). Fragment blocks that differ are fetched
//! from the other owners of the slice and unioned in, so a pass only ever
//! adds bits; the peer picks up our bits on its own pass.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bitgrid_cluster::{Cluster, ClusterState, Node};
use bitgrid_core::blocks::{self, BlockSource};
use bitgrid_core::{Field, FieldKind, Holder, Index, VIEW_BSI, VIEW_STANDARD};
use tracing::{debug, info, warn};

use crate::broadcast::{FragmentKey, PeerClient};
use crate::error::ApiError;

/// What one pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Column attribute entries merged.
    pub column_attrs: usize,
    /// Row attribute entries merged.
    pub row_attrs: usize,
    /// Fragment blocks merged.
    pub blocks: usize,
    /// Peer requests that failed; the data is retried next pass.
    pub errors: usize,
}

pub struct HolderSyncer {
    holder: Arc<Holder>,
    cluster: Arc<Cluster>,
    peers: Arc<dyn PeerClient>,
}

impl HolderSyncer {
    pub fn new(holder: Arc<Holder>, cluster: Arc<Cluster>, peers: Arc<dyn PeerClient>) -> Self {
        Self {
            holder,
            cluster,
            peers,
        }
    }

    /// Runs a pass every `interval` until the task is dropped.
    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.sync_holder().await {
                warn!(error = %e, "anti-entropy pass failed");
            }
        }
    }

    /// Runs one pass over every index. Skipped unless the cluster is
    /// `NORMAL`.
    pub async fn sync_holder(&self) -> Result<SyncReport, ApiError> {
        let mut report = SyncReport::default();
        if self.cluster.state() != ClusterState::Normal {
            debug!(state = %self.cluster.state(), "skipping anti-entropy pass");
            return Ok(report);
        }
        let peers = self.peer_nodes();
        if peers.is_empty() {
            return Ok(report);
        }

        for index in self.holder.indexes() {
            self.sync_column_attrs(&index, &peers, &mut report).await?;
            for field in index.fields() {
                self.sync_row_attrs(&index, &field, &peers, &mut report)
                    .await?;
                self.sync_fragments(&index, &field, &mut report).await?;
            }
        }

        info!(
            column_attrs = report.column_attrs,
            row_attrs = report.row_attrs,
            blocks = report.blocks,
            errors = report.errors,
            "anti-entropy pass done"
        );
        Ok(report)
    }

    fn peer_nodes(&self) -> Vec<Node> {
        let local = self.cluster.local_id();
        self.cluster
            .nodes()
            .into_iter()
            .filter(|n| &n.id != local)
            .collect()
    }

    async fn sync_column_attrs(
        &self,
        index: &Index,
        peers: &[Node],
        report: &mut SyncReport,
    ) -> Result<(), ApiError> {
        let store = index.column_attr_store();
        for peer in peers {
            let diff = match self
                .peers
                .index_attr_diff(peer, index.name(), &store.blocks())
                .await
            {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(peer = %peer.id, index = index.name(), error = %e, "column attr diff failed");
                    report.errors += 1;
                    continue;
                }
            };
            if diff.is_empty() {
                continue;
            }
            report.column_attrs += diff.len();
            store
                .set_bulk_attrs(diff)
                .map_err(ApiError::storage("merging column attrs"))?;
        }
        Ok(())
    }

    async fn sync_row_attrs(
        &self,
        index: &Index,
        field: &Field,
        peers: &[Node],
        report: &mut SyncReport,
    ) -> Result<(), ApiError> {
        let store = field.row_attr_store();
        for peer in peers {
            let diff = match self
                .peers
                .field_attr_diff(peer, index.name(), field.name(), &store.blocks())
                .await
            {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(peer = %peer.id, field = field.name(), error = %e, "row attr diff failed");
                    report.errors += 1;
                    continue;
                }
            };
            if diff.is_empty() {
                continue;
            }
            report.row_attrs += diff.len();
            store
                .set_bulk_attrs(diff)
                .map_err(ApiError::storage("merging row attrs"))?;
        }
        Ok(())
    }

    /// Syncs every view of `field` for each slice this node owns.
    async fn sync_fragments(
        &self,
        index: &Index,
        field: &Field,
        report: &mut SyncReport,
    ) -> Result<(), ApiError> {
        let local = self.cluster.local_id();
        let owned = self
            .cluster
            .owned_slices(local, index.name(), index.max_slice());
        // a replica that never got a write has no views yet
        let mut views: BTreeSet<String> =
            field.views().iter().map(|v| v.name().to_string()).collect();
        views.insert(default_view(field).to_string());
        for view in &views {
            for &slice in &owned {
                let key = FragmentKey::new(index.name(), field.name(), view.as_str(), slice);
                let owners = self.cluster.owners(index.name(), slice);
                for peer in owners.iter().filter(|n| &n.id != local) {
                    self.sync_fragment(&key, peer, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn sync_fragment(
        &self,
        key: &FragmentKey,
        peer: &Node,
        report: &mut SyncReport,
    ) -> Result<(), ApiError> {
        let remote = match self.peers.fragment_blocks(peer, key).await {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(peer = %peer.id, slice = key.slice, error = %e, "fragment blocks failed");
                report.errors += 1;
                return Ok(());
            }
        };
        let local = self
            .holder
            .fragment(&key.index, &key.field, &key.view, key.slice);
        let local_blocks = local.as_ref().map(|f| f.blocks()).unwrap_or_default();
        let ids = blocks::diff(&local_blocks, &remote);
        if ids.is_empty() {
            return Ok(());
        }

        let fragment = match local {
            Some(fragment) => fragment,
            None => self
                .holder
                .field(&key.index, &key.field)
                .ok_or_else(|| ApiError::FieldNotFound(key.field.clone()))?
                .create_view_if_not_exists(&key.view)
                .and_then(|view| view.create_fragment_if_not_exists(key.slice))
                .map_err(ApiError::storage("creating fragment"))?,
        };
        for id in ids {
            let data = match self.peers.fragment_block_data(peer, key, id).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(peer = %peer.id, block = id, error = %e, "fragment block data failed");
                    report.errors += 1;
                    continue;
                }
            };
            fragment
                .merge_block(id, &data)
                .map_err(ApiError::storage("merging fragment block"))?;
            report.blocks += 1;
        }
        debug!(
            index = %key.index,
            field = %key.field,
            view = %key.view,
            slice = key.slice,
            peer = %peer.id,
            "fragment synced"
        );
        Ok(())
    }
}

/// The view every write to `field` lands in.
pub(crate) fn default_view(field: &Field) -> &'static str {
    match field.options().kind {
        FieldKind::Int { .. } => VIEW_BSI,
        _ => VIEW_STANDARD,
    }
}
