//! Checksummed blocks for replica comparison.
//!
//! Both attribute stores and fragments divide their id space into fixed
//! ranges ("blocks"). Each non-empty block has a SHA-256 checksum of its
//! canonical contents, so two replicas can find out where they differ by
//! exchanging `(id, checksum)` lists and then fetch only those blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a block's contents.
pub type Checksum = [u8; 32];

/// Summary of one non-empty block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub checksum: Checksum,
}

impl Block {
    /// Builds a block summary by hashing `bytes`.
    pub fn from_bytes(id: u64, bytes: &[u8]) -> Self {
        Self {
            id,
            checksum: Sha256::digest(bytes).into(),
        }
    }
}

/// Returns, in ascending order, the ids of blocks that differ between two
/// summaries: present on both sides with different checksums, or present
/// on only one side.
pub fn diff(local: &[Block], remote: &[Block]) -> Vec<u64> {
    let local: BTreeMap<u64, &Checksum> = local.iter().map(|b| (b.id, &b.checksum)).collect();
    let remote: BTreeMap<u64, &Checksum> = remote.iter().map(|b| (b.id, &b.checksum)).collect();

    let mut ids: Vec<u64> = local
        .iter()
        .filter(|&(id, sum)| remote.get(id) != Some(sum))
        .map(|(id, _)| *id)
        .collect();
    ids.extend(remote.keys().copied().filter(|id| !local.contains_key(id)));
    ids.sort_unstable();
    ids
}

/// Anything that can be compared block by block with a replica.
pub trait BlockSource {
    /// Full contents of one block.
    type Data;

    /// Summaries of all non-empty blocks, ordered by id.
    fn blocks(&self) -> Vec<Block>;

    /// Contents of block `id`; empty if the block has no data.
    fn block_data(&self, id: u64) -> Self::Data;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u64, content: &str) -> Block {
        Block::from_bytes(id, content.as_bytes())
    }

    #[test]
    fn identical_summaries_have_no_diff() {
        let a = [block(0, "x"), block(3, "y")];
        assert!(diff(&a, &a).is_empty());
    }

    #[test]
    fn diff_is_symmetric_and_sorted() {
        let local = [block(1, "a"), block(3, "b"), block(7, "c")];
        let remote = [block(0, "z"), block(3, "b"), block(7, "changed")];
        assert_eq!(diff(&local, &remote), vec![0, 1, 7]);
        assert_eq!(diff(&remote, &local), vec![0, 1, 7]);
    }

    #[test]
    fn empty_side_differs_everywhere() {
        let local = [block(2, "a"), block(5, "b")];
        assert_eq!(diff(&local, &[]), vec![2, 5]);
        assert_eq!(diff(&[], &local), vec![2, 5]);
    }

    #[test]
    fn checksum_depends_on_content() {
        assert_eq!(block(1, "same"), block(1, "same"));
        assert_ne!(block(1, "same").checksum, block(1, "other").checksum);
    }
}
