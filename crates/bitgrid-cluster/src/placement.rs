//! Slice placement: which nodes own a given (index, slice).
//!
//! Slices are first hashed into a fixed number of partitions (CRC32 of
//! the index name and the big-endian slice number). Each partition is
//! then placed with rendezvous hashing: every node gets a pseudo-random
//! score for the partition and the highest `replicas` scores win.
//!
//! Rendezvous placement depends only on the member set, not on its
//! ordering, so a join can only displace owners in favour of the new
//! node and a leave only touches partitions the leaver owned.

use crate::{Node, NodeId};

/// Default number of partitions slices are hashed into.
pub const DEFAULT_PARTITION_COUNT: u32 = 256;

/// Default number of copies kept of each slice.
pub const DEFAULT_REPLICA_COUNT: usize = 1;

/// The ownership function for a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    partitions: u32,
    replicas: usize,
}

impl Default for Placement {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITION_COUNT, DEFAULT_REPLICA_COUNT)
    }
}

impl Placement {
    /// Creates a placement. Zero values are raised to one.
    pub fn new(partitions: u32, replicas: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            replicas: replicas.max(1),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Returns the partition a slice of an index hashes to.
    pub fn partition(&self, index: &str, slice: u64) -> u32 {
        let mut h = crc32fast::Hasher::new();
        h.update(index.as_bytes());
        h.update(&slice.to_be_bytes());
        h.finalize() % self.partitions
    }

    /// Returns the owners of a partition, primary first.
    ///
    /// `nodes` must not contain duplicate ids. The result has
    /// `min(replicas, nodes.len())` entries.
    pub fn partition_owners<'a>(&self, nodes: &'a [Node], partition: u32) -> Vec<&'a Node> {
        let mut scored: Vec<(u64, &Node)> = nodes
            .iter()
            .map(|node| (score(&node.id, partition), node))
            .collect();
        // ties are broken by id so every node agrees on the order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored
            .into_iter()
            .take(self.replicas.min(nodes.len()))
            .map(|(_, node)| node)
            .collect()
    }

    /// Returns the owners of a slice of an index, primary first.
    pub fn owners<'a>(&self, nodes: &'a [Node], index: &str, slice: u64) -> Vec<&'a Node> {
        self.partition_owners(nodes, self.partition(index, slice))
    }

    /// Returns true if `node` is one of the owners of the slice.
    pub fn owns_slice(&self, nodes: &[Node], node: &NodeId, index: &str, slice: u64) -> bool {
        self.owners(nodes, index, slice)
            .iter()
            .any(|owner| owner.id == *node)
    }

    /// Returns every slice in `0..=max_slice` that `node` owns.
    pub fn owned_slices(
        &self,
        nodes: &[Node],
        node: &NodeId,
        index: &str,
        max_slice: u64,
    ) -> Vec<u64> {
        (0..=max_slice)
            .filter(|&slice| self.owns_slice(nodes, node, index, slice))
            .collect()
    }
}

/// Rendezvous score of a node for a partition.
fn score(node: &NodeId, partition: u32) -> u64 {
    let seed = crc32fast::hash(node.as_str().as_bytes()) as u64;
    mix64((seed << 32) | partition as u64)
}

/// 64-bit finalizer (splitmix64) so neighbouring inputs spread evenly.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
