//! Bitmap storage for one (index, field, view, slice).
//!
//! A fragment holds one compressed bitmap per row. Each bitmap stores
//! column offsets within the slice, so the bit for `(row, column)` lives
//! at offset `column % SLICE_WIDTH` of row `row`. The whole fragment is
//! rewritten to disk after every mutation.
//!
//! Rows are grouped into blocks of [`HASH_BLOCK_SIZE`] for checksum
//! comparison between replicas.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use bitgrid_persistence::format::{self, FRAGMENT_MAGIC};
use bitgrid_persistence::snapshot;
use roaring::RoaringBitmap;
use tracing::debug;

use crate::blocks::{Block, BlockSource};
use crate::cache::{CacheType, Pair, RowCache};
use crate::StorageError;

/// Number of columns in a slice.
pub const SLICE_WIDTH: u64 = 1 << 20;

/// Highest slice whose columns fit in a `u64`.
pub const MAX_SLICE: u64 = u64::MAX / SLICE_WIDTH;

/// Rejects slices whose columns cannot be addressed.
pub fn validate_slice(slice: u64) -> Result<(), StorageError> {
    if slice > MAX_SLICE {
        return Err(StorageError::SliceOutOfRange(slice));
    }
    Ok(())
}

/// Number of rows per checksum block.
pub const HASH_BLOCK_SIZE: u64 = 100;

/// Rows and columns of the bits in one block, as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockData {
    pub rows: Vec<u64>,
    pub columns: Vec<u64>,
}

#[derive(Debug)]
struct Inner {
    rows: BTreeMap<u64, RoaringBitmap>,
    cache: RowCache,
}

/// One slice of one view of a field.
#[derive(Debug)]
pub struct Fragment {
    path: PathBuf,
    slice: u64,
    inner: RwLock<Inner>,
}

impl Fragment {
    /// Opens the fragment stored at `path`, or an empty one if the file
    /// does not exist yet.
    pub fn open(
        path: impl Into<PathBuf>,
        slice: u64,
        cache_type: CacheType,
        cache_size: u32,
    ) -> Result<Self, StorageError> {
        validate_slice(slice)?;
        let path = path.into();
        let rows = match snapshot::load(&path, FRAGMENT_MAGIC)? {
            Some(records) => decode_rows(records)?,
            None => BTreeMap::new(),
        };
        let mut inner = Inner {
            rows,
            cache: RowCache::new(cache_type, cache_size),
        };
        rebuild_cache(&mut inner);
        debug!(path = %path.display(), rows = inner.rows.len(), "opened fragment");
        Ok(Self {
            path,
            slice,
            inner: RwLock::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slice(&self) -> u64 {
        self.slice
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn offset(&self, column: u64) -> Result<u32, StorageError> {
        if column / SLICE_WIDTH != self.slice {
            return Err(StorageError::ColumnOutOfSlice {
                column,
                slice: self.slice,
            });
        }
        Ok((column % SLICE_WIDTH) as u32)
    }

    // cannot overflow: open rejects slices above MAX_SLICE
    fn column(&self, offset: u32) -> u64 {
        self.slice * SLICE_WIDTH + offset as u64
    }

    /// Sets a bit. Returns true if it was not already set.
    pub fn set_bit(&self, row: u64, column: u64) -> Result<bool, StorageError> {
        let offset = self.offset(column)?;
        let mut inner = self.write();
        let changed = inner.rows.entry(row).or_default().insert(offset);
        if changed {
            touch(&mut inner, row);
            self.save(&inner)?;
        }
        Ok(changed)
    }

    /// Clears a bit. Returns true if it was set.
    pub fn clear_bit(&self, row: u64, column: u64) -> Result<bool, StorageError> {
        let offset = self.offset(column)?;
        let mut inner = self.write();
        let changed = inner
            .rows
            .get_mut(&row)
            .is_some_and(|bits| bits.remove(offset));
        if changed {
            touch(&mut inner, row);
            self.save(&inner)?;
        }
        Ok(changed)
    }

    pub fn contains(&self, row: u64, column: u64) -> bool {
        let Ok(offset) = self.offset(column) else {
            return false;
        };
        self.read()
            .rows
            .get(&row)
            .is_some_and(|bits| bits.contains(offset))
    }

    /// Column ids set in `row`, ascending.
    pub fn row(&self, row: u64) -> Vec<u64> {
        let inner = self.read();
        inner
            .rows
            .get(&row)
            .map(|bits| bits.iter().map(|o| self.column(o)).collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, row: u64) -> u64 {
        self.read().rows.get(&row).map_or(0, |bits| bits.len())
    }

    /// Ids of all non-empty rows, ascending.
    pub fn rows(&self) -> Vec<u64> {
        self.read().rows.keys().copied().collect()
    }

    /// Highest non-empty row id, or zero for an empty fragment.
    pub fn max_row(&self) -> u64 {
        self.read().rows.keys().next_back().copied().unwrap_or(0)
    }

    /// Total number of set bits.
    pub fn bit_count(&self) -> u64 {
        self.read().rows.values().map(|bits| bits.len()).sum()
    }

    /// Calls `f(row, column)` for every set bit, ordered by row then
    /// column. Stops at the first error.
    pub fn for_each_bit<E>(
        &self,
        mut f: impl FnMut(u64, u64) -> Result<(), E>,
    ) -> Result<(), E> {
        let inner = self.read();
        for (row, bits) in &inner.rows {
            for offset in bits.iter() {
                f(*row, self.column(offset))?;
            }
        }
        Ok(())
    }

    /// Sets many bits with a single write to disk.
    pub fn bulk_import(&self, rows: &[u64], columns: &[u64]) -> Result<(), StorageError> {
        if rows.len() != columns.len() {
            return Err(StorageError::LengthMismatch(rows.len(), columns.len()));
        }
        let offsets = columns
            .iter()
            .map(|c| self.offset(*c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut inner = self.write();
        let mut touched = Vec::new();
        for (row, offset) in rows.iter().zip(offsets) {
            if inner.rows.entry(*row).or_default().insert(offset) {
                touched.push(*row);
            }
        }
        touched.sort_unstable();
        touched.dedup();
        for row in touched {
            touch(&mut inner, row);
        }
        self.save(&inner)
    }

    /// Stores bit-sliced unsigned values: row `i` holds bit `i` of the
    /// value for `i < depth`, row `depth` marks that a value exists.
    pub fn import_value(
        &self,
        columns: &[u64],
        values: &[u64],
        depth: u32,
    ) -> Result<(), StorageError> {
        if columns.len() != values.len() {
            return Err(StorageError::LengthMismatch(columns.len(), values.len()));
        }
        let offsets = columns
            .iter()
            .map(|c| self.offset(*c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut inner = self.write();
        for (offset, value) in offsets.into_iter().zip(values) {
            for bit in 0..depth {
                let bits = inner.rows.entry(bit as u64).or_default();
                if (value >> bit) & 1 == 1 {
                    bits.insert(offset);
                } else {
                    bits.remove(offset);
                }
            }
            inner.rows.entry(depth as u64).or_default().insert(offset);
        }
        inner.rows.retain(|_, bits| !bits.is_empty());
        rebuild_cache(&mut inner);
        self.save(&inner)
    }

    /// Reads a bit-sliced value stored by [`import_value`](Self::import_value).
    pub fn value(&self, column: u64, depth: u32) -> Option<u64> {
        let offset = self.offset(column).ok()?;
        let inner = self.read();
        let exists = inner
            .rows
            .get(&(depth as u64))
            .is_some_and(|bits| bits.contains(offset));
        if !exists {
            return None;
        }
        let mut value = 0u64;
        for bit in 0..depth {
            if inner
                .rows
                .get(&(bit as u64))
                .is_some_and(|bits| bits.contains(offset))
            {
                value |= 1 << bit;
            }
        }
        Some(value)
    }

    /// Sets every bit of a block fetched from a replica. Bits are only
    /// ever added, never cleared. Returns how many bits were new.
    pub fn merge_block(&self, id: u64, data: &BlockData) -> Result<usize, StorageError> {
        if data.rows.len() != data.columns.len() {
            return Err(StorageError::LengthMismatch(
                data.rows.len(),
                data.columns.len(),
            ));
        }
        if let Some(row) = data.rows.iter().find(|r| *r / HASH_BLOCK_SIZE != id) {
            return Err(StorageError::Corrupt(format!(
                "row {row} is outside block {id}"
            )));
        }
        self.bulk_merge(&data.rows, &data.columns)
    }

    fn bulk_merge(&self, rows: &[u64], columns: &[u64]) -> Result<usize, StorageError> {
        let offsets = columns
            .iter()
            .map(|c| self.offset(*c))
            .collect::<Result<Vec<_>, _>>()?;
        let mut inner = self.write();
        let mut added = 0;
        let mut touched = Vec::new();
        for (row, offset) in rows.iter().zip(offsets) {
            if inner.rows.entry(*row).or_default().insert(offset) {
                added += 1;
                touched.push(*row);
            }
        }
        if added > 0 {
            touched.sort_unstable();
            touched.dedup();
            for row in touched {
                touch(&mut inner, row);
            }
            self.save(&inner)?;
        }
        Ok(added)
    }

    /// Serializes the fragment in its on-disk format.
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), StorageError> {
        let inner = self.read();
        let records = encode_rows(&inner.rows)?;
        snapshot::write_snapshot(w, FRAGMENT_MAGIC, &records)?;
        Ok(())
    }

    /// Replaces the fragment's contents with data produced by
    /// [`write_to`](Self::write_to).
    pub fn read_from(&self, r: &mut impl Read) -> Result<(), StorageError> {
        let records = snapshot::read_snapshot(r, FRAGMENT_MAGIC)?;
        let rows = decode_rows(records)?;
        let mut inner = self.write();
        inner.rows = rows;
        rebuild_cache(&mut inner);
        self.save(&inner)
    }

    /// Writes the current contents to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        let inner = self.read();
        self.save(&inner)
    }

    /// Up to `n` rows with the highest bit counts, from the cache.
    pub fn top(&self, n: usize) -> Vec<Pair> {
        let mut inner = self.write();
        let mut pairs = inner.cache.top();
        pairs.truncate(n);
        pairs
    }

    /// Rebuilds the row count cache from the bitmaps.
    pub fn recalculate_cache(&self) {
        let mut inner = self.write();
        rebuild_cache(&mut inner);
    }

    fn save(&self, inner: &Inner) -> Result<(), StorageError> {
        let records = encode_rows(&inner.rows)?;
        snapshot::persist(&self.path, FRAGMENT_MAGIC, &records)?;
        Ok(())
    }
}

impl BlockSource for Fragment {
    type Data = BlockData;

    fn blocks(&self) -> Vec<Block> {
        let inner = self.read();
        let mut blocks = Vec::new();
        let mut current: Option<u64> = None;
        let mut buf = Vec::new();
        for (row, bits) in &inner.rows {
            let id = row / HASH_BLOCK_SIZE;
            if current != Some(id) {
                if let Some(prev) = current {
                    blocks.push(Block::from_bytes(prev, &buf));
                }
                current = Some(id);
                buf.clear();
            }
            for offset in bits.iter() {
                buf.extend_from_slice(&row.to_le_bytes());
                buf.extend_from_slice(&(offset as u64).to_le_bytes());
            }
        }
        if let Some(prev) = current {
            blocks.push(Block::from_bytes(prev, &buf));
        }
        blocks
    }

    fn block_data(&self, id: u64) -> BlockData {
        let inner = self.read();
        let start = id.saturating_mul(HASH_BLOCK_SIZE);
        let end = start.saturating_add(HASH_BLOCK_SIZE);
        let mut data = BlockData::default();
        for (row, bits) in inner.rows.range(start..end) {
            for offset in bits.iter() {
                data.rows.push(*row);
                data.columns.push(self.column(offset));
            }
        }
        data
    }
}

fn touch(inner: &mut Inner, row: u64) {
    let count = inner.rows.get(&row).map_or(0, |bits| bits.len());
    if count == 0 {
        inner.rows.remove(&row);
    }
    inner.cache.add(row, count);
}

fn rebuild_cache(inner: &mut Inner) {
    inner.cache.clear();
    for (row, bits) in &inner.rows {
        inner.cache.add(*row, bits.len());
    }
    inner.cache.recalculate();
}

/// Record layout: `[row: u64 LE][serialized roaring bitmap]`.
fn encode_rows(rows: &BTreeMap<u64, RoaringBitmap>) -> Result<Vec<Vec<u8>>, StorageError> {
    rows.iter()
        .filter(|(_, bits)| !bits.is_empty())
        .map(|(row, bits)| -> Result<Vec<u8>, StorageError> {
            let mut record = Vec::with_capacity(8 + bits.serialized_size());
            format::write_u64(&mut record, *row)?;
            bits.serialize_into(&mut record)?;
            Ok(record)
        })
        .collect()
}

fn decode_rows(records: Vec<Vec<u8>>) -> Result<BTreeMap<u64, RoaringBitmap>, StorageError> {
    let mut rows = BTreeMap::new();
    for record in records {
        let mut bitmap = record.as_slice();
        let row = format::read_u64(&mut bitmap)?;
        let bits = RoaringBitmap::deserialize_from(bitmap)?;
        if !bits.is_empty() {
            rows.insert(row, bits);
        }
    }
    Ok(rows)
}
