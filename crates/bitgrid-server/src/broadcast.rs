//! Capabilities for talking to other nodes.
//!
//! The transport itself lives outside this crate. [`Broadcaster`] pushes
//! cluster messages; [`PeerClient`] pulls data from a specific peer during
//! resizes and anti-entropy.

use async_trait::async_trait;
use bitgrid_cluster::Node;
use bitgrid_core::{AttrMap, Block, BlockData};
use bytes::Bytes;

use crate::error::BroadcastError;
use crate::message::Message;

/// Fans cluster messages out to peers.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Delivers `msg` to every other member and waits for all of them.
    /// Returns the first failure.
    async fn send_sync(&self, msg: &Message) -> Result<(), BroadcastError>;

    /// Queues `msg` for every other member without waiting for delivery.
    async fn send_async(&self, msg: &Message) -> Result<(), BroadcastError>;

    /// Delivers `msg` to one node.
    async fn send_to(&self, node: &Node, msg: &Message) -> Result<(), BroadcastError>;
}

/// Broadcaster for a node that has no peers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopBroadcaster;

#[async_trait]
impl Broadcaster for NopBroadcaster {
    async fn send_sync(&self, _msg: &Message) -> Result<(), BroadcastError> {
        Ok(())
    }

    async fn send_async(&self, _msg: &Message) -> Result<(), BroadcastError> {
        Ok(())
    }

    async fn send_to(&self, _node: &Node, _msg: &Message) -> Result<(), BroadcastError> {
        Ok(())
    }
}

/// Addresses one fragment on any node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub index: String,
    pub field: String,
    pub view: String,
    pub slice: u64,
}

impl FragmentKey {
    pub fn new(
        index: impl Into<String>,
        field: impl Into<String>,
        view: impl Into<String>,
        slice: u64,
    ) -> Self {
        Self {
            index: index.into(),
            field: field.into(),
            view: view.into(),
            slice,
        }
    }
}

/// Reads data held by a peer.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Snapshot of a fragment, or `None` if the peer has none.
    async fn fragment_data(
        &self,
        node: &Node,
        key: &FragmentKey,
    ) -> Result<Option<Bytes>, BroadcastError>;

    /// Block checksums of a fragment; empty if the peer has none.
    async fn fragment_blocks(
        &self,
        node: &Node,
        key: &FragmentKey,
    ) -> Result<Vec<Block>, BroadcastError>;

    async fn fragment_block_data(
        &self,
        node: &Node,
        key: &FragmentKey,
        block: u64,
    ) -> Result<BlockData, BroadcastError>;

    /// Column attributes of every block where the peer differs from `blocks`.
    async fn index_attr_diff(
        &self,
        node: &Node,
        index: &str,
        blocks: &[Block],
    ) -> Result<AttrMap, BroadcastError>;

    /// Row attributes of every block where the peer differs from `blocks`.
    async fn field_attr_diff(
        &self,
        node: &Node,
        index: &str,
        field: &str,
        blocks: &[Block],
    ) -> Result<AttrMap, BroadcastError>;
}

/// Peer client for a node that has no peers: every peer looks empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopPeerClient;

#[async_trait]
impl PeerClient for NopPeerClient {
    async fn fragment_data(
        &self,
        _node: &Node,
        _key: &FragmentKey,
    ) -> Result<Option<Bytes>, BroadcastError> {
        Ok(None)
    }

    async fn fragment_blocks(
        &self,
        _node: &Node,
        _key: &FragmentKey,
    ) -> Result<Vec<Block>, BroadcastError> {
        Ok(Vec::new())
    }

    async fn fragment_block_data(
        &self,
        _node: &Node,
        _key: &FragmentKey,
        _block: u64,
    ) -> Result<BlockData, BroadcastError> {
        Ok(BlockData::default())
    }

    async fn index_attr_diff(
        &self,
        _node: &Node,
        _index: &str,
        _blocks: &[Block],
    ) -> Result<AttrMap, BroadcastError> {
        Ok(AttrMap::new())
    }

    async fn field_attr_diff(
        &self,
        _node: &Node,
        _index: &str,
        _field: &str,
        _blocks: &[Block],
    ) -> Result<AttrMap, BroadcastError> {
        Ok(AttrMap::new())
    }
}
