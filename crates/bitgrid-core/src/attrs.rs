//! Key/value attributes attached to row or column ids.
//!
//! An `AttrStore` keeps every id's attributes in memory and rewrites its
//! `.data` file after each change. Ids are grouped into blocks of
//! [`ATTR_BLOCK_SIZE`] for replica comparison (see [`crate::blocks`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use bitgrid_persistence::format::{self, ATTR_MAGIC};
use bitgrid_persistence::snapshot;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blocks::{Block, BlockSource};
use crate::StorageError;

/// Number of consecutive ids per attribute block.
pub const ATTR_BLOCK_SIZE: u64 = 100;

/// A single attribute value. `Null` in a write deletes the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

/// Attributes of one id, ordered by key.
pub type Attrs = BTreeMap<String, AttrValue>;

/// Attributes of many ids, ordered by id.
pub type AttrMap = BTreeMap<u64, Attrs>;

/// Persistent attribute storage for one index (columns) or field (rows).
#[derive(Debug)]
pub struct AttrStore {
    path: PathBuf,
    data: RwLock<AttrMap>,
}

impl AttrStore {
    /// Opens the store at `path`, loading any existing data.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let mut data = AttrMap::new();
        if let Some(records) = snapshot::load(&path, ATTR_MAGIC)? {
            for record in records {
                let (id, attrs) = decode_record(&record)?;
                data.insert(id, attrs);
            }
        }
        debug!(path = %path.display(), ids = data.len(), "opened attr store");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attributes of `id`; empty if it has none.
    pub fn attrs(&self, id: u64) -> Attrs {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(&id).cloned().unwrap_or_default()
    }

    /// Merges `attrs` into the attributes of `id`.
    pub fn set_attrs(&self, id: u64, attrs: Attrs) -> Result<(), StorageError> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        merge_into(&mut data, id, attrs);
        self.save(&data)
    }

    /// Merges attributes for many ids with a single write.
    pub fn set_bulk_attrs(&self, bulk: AttrMap) -> Result<(), StorageError> {
        if bulk.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        for (id, attrs) in bulk {
            merge_into(&mut data, id, attrs);
        }
        self.save(&data)
    }

    /// Number of ids with at least one attribute.
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self, data: &AttrMap) -> Result<(), StorageError> {
        let records = data
            .iter()
            .map(|(id, attrs)| encode_record(*id, attrs))
            .collect::<Result<Vec<_>, _>>()?;
        snapshot::persist(&self.path, ATTR_MAGIC, &records)?;
        Ok(())
    }
}

impl BlockSource for AttrStore {
    type Data = AttrMap;

    fn blocks(&self) -> Vec<Block> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let mut grouped: BTreeMap<u64, AttrMap> = BTreeMap::new();
        for (id, attrs) in data.iter() {
            grouped
                .entry(id / ATTR_BLOCK_SIZE)
                .or_default()
                .insert(*id, attrs.clone());
        }
        grouped
            .into_iter()
            .map(|(block, contents)| Block::from_bytes(block, &canonical_bytes(&contents)))
            .collect()
    }

    fn block_data(&self, id: u64) -> AttrMap {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let start = id.saturating_mul(ATTR_BLOCK_SIZE);
        let end = start.saturating_add(ATTR_BLOCK_SIZE);
        data.range(start..end)
            .map(|(id, attrs)| (*id, attrs.clone()))
            .collect()
    }
}

fn merge_into(data: &mut AttrMap, id: u64, attrs: Attrs) {
    let entry = data.entry(id).or_default();
    for (key, value) in attrs {
        if value == AttrValue::Null {
            entry.remove(&key);
        } else {
            entry.insert(key, value);
        }
    }
    if entry.is_empty() {
        data.remove(&id);
    }
}

/// Deterministic encoding used for block checksums. Maps are ordered,
/// so equal contents always produce equal bytes.
fn canonical_bytes(block: &AttrMap) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, attrs) in block {
        out.extend_from_slice(&id.to_le_bytes());
        // serializing ordered maps of plain values cannot fail
        out.extend_from_slice(&serde_json::to_vec(attrs).unwrap_or_default());
    }
    out
}

/// Record layout: `[id: u64 LE][attrs as JSON]`.
fn encode_record(id: u64, attrs: &Attrs) -> Result<Vec<u8>, StorageError> {
    let mut record = Vec::new();
    format::write_u64(&mut record, id)?;
    let json = serde_json::to_vec(attrs)
        .map_err(|e| StorageError::Corrupt(format!("encoding attrs of {id}: {e}")))?;
    record.extend_from_slice(&json);
    Ok(record)
}

fn decode_record(record: &[u8]) -> Result<(u64, Attrs), StorageError> {
    let mut json = record;
    let id = format::read_u64(&mut json)?;
    let attrs = serde_json::from_slice(json)
        .map_err(|e| StorageError::Corrupt(format!("decoding attrs of {id}: {e}")))?;
    Ok((id, attrs))
}
