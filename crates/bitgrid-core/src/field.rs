//! Fields: a named bitmap dimension of an index.
//!
//! A field owns its views (created on first write), its row attribute
//! store and its options, which are persisted to `<field>/.meta` when the
//! field is created.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bitgrid_persistence::meta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attrs::AttrStore;
use crate::cache::{sort_pairs, CacheType, Pair, DEFAULT_CACHE_SIZE};
use crate::fragment::SLICE_WIDTH;
use crate::name::{validate_name, validate_view_name};
use crate::time::{views_by_time, TimeQuantum, VIEW_BSI, VIEW_STANDARD};
use crate::view::View;
use crate::StorageError;

/// What a field stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    /// Plain row/column bits.
    #[default]
    Set,
    /// One integer per column in `[min, max]`, stored bit-sliced.
    Int { min: i64, max: i64 },
    /// Row/column bits, also bucketed into time views.
    Time { quantum: TimeQuantum },
}

/// Options a field is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    pub kind: FieldKind,
    pub cache_type: CacheType,
    pub cache_size: u32,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            kind: FieldKind::Set,
            cache_type: CacheType::Ranked,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl FieldOptions {
    pub fn int(min: i64, max: i64) -> Self {
        Self {
            kind: FieldKind::Int { min, max },
            ..Default::default()
        }
    }

    pub fn time(quantum: TimeQuantum) -> Self {
        Self {
            kind: FieldKind::Time { quantum },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if let FieldKind::Int { min, max } = self.kind {
            if min > max {
                return Err(StorageError::InvalidOption(format!(
                    "int field min {min} is greater than max {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Number of bits needed to store every value of `[min, max]` as an
/// offset from `min`.
pub fn bit_depth(min: i64, max: i64) -> u32 {
    let range = (max as i128 - min as i128).max(0) as u128;
    (u128::BITS - range.leading_zeros()).max(1)
}

/// A named field of an index.
#[derive(Debug)]
pub struct Field {
    path: PathBuf,
    index: String,
    name: String,
    options: FieldOptions,
    views: RwLock<BTreeMap<String, Arc<View>>>,
    row_attrs: AttrStore,
}

impl Field {
    /// Opens an existing field directory. Missing options fall back to
    /// the defaults.
    pub fn open(
        path: impl Into<PathBuf>,
        index: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let name = name.into();
        validate_name(&name)?;
        let options = meta::read_meta(&path.join(".meta"))?.unwrap_or_default();
        Self::open_with(path, index.into(), name, options)
    }

    /// Creates a new field directory and persists its options.
    pub fn create(
        path: impl Into<PathBuf>,
        index: impl Into<String>,
        name: impl Into<String>,
        options: FieldOptions,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let name = name.into();
        validate_name(&name)?;
        options.validate()?;
        fs::create_dir_all(&path)?;
        let field = Self::open_with(path, index.into(), name, options)?;
        field.save_meta()?;
        Ok(field)
    }

    fn open_with(
        path: PathBuf,
        index: String,
        name: String,
        options: FieldOptions,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(path.join("views"))?;
        let row_attrs = AttrStore::open(path.join(".data"))?;
        let field = Self {
            path,
            index,
            name,
            options,
            views: RwLock::new(BTreeMap::new()),
            row_attrs,
        };
        field.open_views()?;
        debug!(index = %field.index, field = %field.name, "opened field");
        Ok(field)
    }

    fn open_views(&self) -> Result<(), StorageError> {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        for entry in fs::read_dir(self.path.join("views"))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_view_name(&name).is_err() {
                warn!(path = %entry.path().display(), "skipping unknown dir in views dir");
                continue;
            }
            let view = self.new_view(&name)?;
            views.insert(name, Arc::new(view));
        }
        Ok(())
    }

    fn new_view(&self, name: &str) -> Result<View, StorageError> {
        let cache_type = if name == VIEW_BSI {
            CacheType::None
        } else {
            self.options.cache_type
        };
        View::open(
            self.path.join("views").join(name),
            name,
            cache_type,
            self.options.cache_size,
        )
    }

    fn save_meta(&self) -> Result<(), StorageError> {
        meta::write_meta(&self.path.join(".meta"), &self.options)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn row_attr_store(&self) -> &AttrStore {
        &self.row_attrs
    }

    /// All views, ordered by name.
    pub fn views(&self) -> Vec<Arc<View>> {
        let views = self.views.read().unwrap_or_else(|e| e.into_inner());
        views.values().cloned().collect()
    }

    pub fn view(&self, name: &str) -> Option<Arc<View>> {
        let views = self.views.read().unwrap_or_else(|e| e.into_inner());
        views.get(name).cloned()
    }

    pub fn create_view_if_not_exists(&self, name: &str) -> Result<Arc<View>, StorageError> {
        validate_view_name(name)?;
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        if let Some(view) = views.get(name) {
            return Ok(Arc::clone(view));
        }
        let view = Arc::new(self.new_view(name)?);
        views.insert(name.to_string(), Arc::clone(&view));
        Ok(view)
    }

    /// Closes a view and removes its directory.
    pub fn delete_view(&self, name: &str) -> Result<(), StorageError> {
        validate_view_name(name)?;
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        let view = views
            .remove(name)
            .ok_or_else(|| StorageError::ViewNotFound(name.to_string()))?;
        view.close()?;
        fs::remove_dir_all(view.path())?;
        info!(index = %self.index, field = %self.name, view = name, "deleted view");
        Ok(())
    }

    /// Sets a bit in the standard view and, for time fields, in every
    /// time view `timestamp` falls into.
    pub fn set_bit(
        &self,
        row: u64,
        column: u64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let slice = column / SLICE_WIDTH;
        let mut changed = self
            .create_view_if_not_exists(VIEW_STANDARD)?
            .create_fragment_if_not_exists(slice)?
            .set_bit(row, column)?;
        if let Some(t) = timestamp {
            for name in self.time_views(&t)? {
                changed |= self
                    .create_view_if_not_exists(&name)?
                    .create_fragment_if_not_exists(slice)?
                    .set_bit(row, column)?;
            }
        }
        Ok(changed)
    }

    /// Clears a bit in the standard view.
    pub fn clear_bit(&self, row: u64, column: u64) -> Result<bool, StorageError> {
        let Some(view) = self.view(VIEW_STANDARD) else {
            return Ok(false);
        };
        match view.fragment(column / SLICE_WIDTH) {
            Some(fragment) => fragment.clear_bit(row, column),
            None => Ok(false),
        }
    }

    fn time_views(&self, t: &DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        match &self.options.kind {
            FieldKind::Time { quantum } => Ok(views_by_time(VIEW_STANDARD, t, quantum)),
            _ => Err(StorageError::InvalidOption(format!(
                "field {} has no time quantum",
                self.name
            ))),
        }
    }

    /// Bulk-sets bits. `timestamps` is either empty or parallel to the
    /// other arrays; `None` entries only go to the standard view.
    pub fn import(
        &self,
        rows: &[u64],
        columns: &[u64],
        timestamps: &[Option<DateTime<Utc>>],
    ) -> Result<(), StorageError> {
        if rows.len() != columns.len() {
            return Err(StorageError::LengthMismatch(rows.len(), columns.len()));
        }
        if !timestamps.is_empty() && timestamps.len() != columns.len() {
            return Err(StorageError::LengthMismatch(columns.len(), timestamps.len()));
        }

        let mut batches: HashMap<(String, u64), (Vec<u64>, Vec<u64>)> = HashMap::new();
        for (i, (&row, &column)) in rows.iter().zip(columns).enumerate() {
            let slice = column / SLICE_WIDTH;
            let mut views = vec![VIEW_STANDARD.to_string()];
            if let Some(Some(t)) = timestamps.get(i) {
                views.extend(self.time_views(t)?);
            }
            for view in views {
                let batch = batches.entry((view, slice)).or_default();
                batch.0.push(row);
                batch.1.push(column);
            }
        }

        for ((view, slice), (rows, columns)) in batches {
            self.create_view_if_not_exists(&view)?
                .create_fragment_if_not_exists(slice)?
                .bulk_import(&rows, &columns)?;
        }
        Ok(())
    }

    fn int_range(&self) -> Result<(i64, i64), StorageError> {
        match self.options.kind {
            FieldKind::Int { min, max } => Ok((min, max)),
            _ => Err(StorageError::NotIntField(self.name.clone())),
        }
    }

    /// Bulk-sets integer values.
    pub fn import_value(&self, columns: &[u64], values: &[i64]) -> Result<(), StorageError> {
        let (min, max) = self.int_range()?;
        if columns.len() != values.len() {
            return Err(StorageError::LengthMismatch(columns.len(), values.len()));
        }
        let depth = bit_depth(min, max);

        let mut batches: HashMap<u64, (Vec<u64>, Vec<u64>)> = HashMap::new();
        for (&column, &value) in columns.iter().zip(values) {
            if value < min || value > max {
                return Err(StorageError::ValueOutOfRange { value, min, max });
            }
            let batch = batches.entry(column / SLICE_WIDTH).or_default();
            batch.0.push(column);
            batch.1.push((value as i128 - min as i128) as u64);
        }

        let view = self.create_view_if_not_exists(VIEW_BSI)?;
        for (slice, (columns, offsets)) in batches {
            view.create_fragment_if_not_exists(slice)?
                .import_value(&columns, &offsets, depth)?;
        }
        Ok(())
    }

    /// Integer value of a column, if one was stored.
    pub fn value(&self, column: u64) -> Result<Option<i64>, StorageError> {
        let (min, max) = self.int_range()?;
        let Some(fragment) = self
            .view(VIEW_BSI)
            .and_then(|v| v.fragment(column / SLICE_WIDTH))
        else {
            return Ok(None);
        };
        Ok(fragment
            .value(column, bit_depth(min, max))
            .map(|offset| (min as i128 + offset as i128) as i64))
    }

    /// Highest slice any view holds locally.
    pub fn max_slice(&self) -> u64 {
        self.views().iter().map(|v| v.max_slice()).max().unwrap_or(0)
    }

    pub fn recalculate_caches(&self) {
        for view in self.views() {
            view.recalculate_caches();
        }
    }

    /// Top `n` rows of the standard view by bit count, across all local
    /// slices.
    pub fn top_n(&self, n: usize) -> Vec<Pair> {
        let Some(view) = self.view(VIEW_STANDARD) else {
            return Vec::new();
        };
        let mut counts: HashMap<u64, u64> = HashMap::new();
        for fragment in view.fragments() {
            for pair in fragment.top(usize::MAX) {
                *counts.entry(pair.id).or_default() += pair.count;
            }
        }
        let mut pairs: Vec<Pair> = counts
            .into_iter()
            .map(|(id, count)| Pair { id, count })
            .collect();
        sort_pairs(&mut pairs);
        pairs.truncate(n);
        pairs
    }

    pub fn close(&self) -> Result<(), StorageError> {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        for view in views.values() {
            view.close()?;
        }
        views.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create(dir: &tempfile::TempDir, options: FieldOptions) -> Field {
        Field::create(dir.path().join("f"), "i", "f", options).unwrap()
    }

    #[test]
    fn bit_depths() {
        assert_eq!(bit_depth(0, 0), 1);
        assert_eq!(bit_depth(0, 1), 1);
        assert_eq!(bit_depth(0, 1023), 10);
        assert_eq!(bit_depth(-10, 10), 5);
        assert_eq!(bit_depth(i64::MIN, i64::MAX), 64);
    }

    #[test]
    fn options_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let opts = FieldOptions {
            cache_type: CacheType::Lru,
            cache_size: 10,
            ..FieldOptions::int(-5, 5)
        };
        create(&dir, opts.clone()).close().unwrap();
        let field = Field::open(dir.path().join("f"), "i", "f").unwrap();
        assert_eq!(field.options(), &opts);
    }

    #[test]
    fn invalid_int_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Field::create(dir.path().join("f"), "i", "f", FieldOptions::int(5, 1))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidOption(_)));
    }

    #[test]
    fn set_bit_creates_view_and_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::default());
        assert!(field.set_bit(3, SLICE_WIDTH + 7, None).unwrap());
        let names: Vec<String> = field.views().iter().map(|v| v.name().to_string()).collect();
        assert_eq!(names, vec![VIEW_STANDARD]);
        assert_eq!(field.max_slice(), 1);
        assert!(field.clear_bit(3, SLICE_WIDTH + 7).unwrap());
    }

    #[test]
    fn timestamps_need_time_field() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::default());
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        assert!(matches!(
            field.set_bit(1, 1, Some(t)),
            Err(StorageError::InvalidOption(_))
        ));
    }

    #[test]
    fn import_with_time_views() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::time("YM".parse().unwrap()));
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        field
            .import(&[1, 2], &[10, SLICE_WIDTH + 20], &[Some(t), None])
            .unwrap();

        let names: Vec<String> = field.views().iter().map(|v| v.name().to_string()).collect();
        assert_eq!(names, vec!["standard", "standard_2024", "standard_202403"]);
        let month = field.view("standard_202403").unwrap();
        assert!(month.fragment(0).unwrap().contains(1, 10));
        assert!(month.fragment(1).is_none());
        assert!(field
            .view(VIEW_STANDARD)
            .unwrap()
            .fragment(1)
            .unwrap()
            .contains(2, SLICE_WIDTH + 20));
    }

    #[test]
    fn int_values_round_trip_through_bsi() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::int(-100, 100));
        field
            .import_value(&[1, 2, SLICE_WIDTH + 3], &[-100, 0, 100])
            .unwrap();
        assert_eq!(field.value(1).unwrap(), Some(-100));
        assert_eq!(field.value(2).unwrap(), Some(0));
        assert_eq!(field.value(SLICE_WIDTH + 3).unwrap(), Some(100));
        assert_eq!(field.value(4).unwrap(), None);
        assert!(matches!(
            field.import_value(&[1], &[101]),
            Err(StorageError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn import_value_needs_int_field() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::default());
        assert!(matches!(
            field.import_value(&[1], &[1]),
            Err(StorageError::NotIntField(_))
        ));
    }

    #[test]
    fn delete_view() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::default());
        field.set_bit(1, 1, None).unwrap();
        let path = field.view(VIEW_STANDARD).unwrap().path().to_path_buf();
        field.delete_view(VIEW_STANDARD).unwrap();
        assert!(!path.exists());
        assert!(matches!(
            field.delete_view(VIEW_STANDARD),
            Err(StorageError::ViewNotFound(_))
        ));
    }

    #[test]
    fn view_names_cannot_leave_the_field() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::default());
        field.set_bit(1, 1, None).unwrap();
        for name in ["../../..", "..", "standard/../x"] {
            assert!(matches!(
                field.create_view_if_not_exists(name),
                Err(StorageError::InvalidViewName(_))
            ));
            assert!(matches!(
                field.delete_view(name),
                Err(StorageError::InvalidViewName(_))
            ));
        }
        assert!(!dir.path().join("f").join("fragments").exists());
        assert!(field.view(VIEW_STANDARD).unwrap().path().exists());
    }

    #[test]
    fn top_n_sums_slices() {
        let dir = tempfile::tempdir().unwrap();
        let field = create(&dir, FieldOptions::default());
        field
            .import(
                &[1, 1, 2, 2, 2],
                &[1, SLICE_WIDTH + 1, 1, 2, 3],
                &[],
            )
            .unwrap();
        let top = field.top_n(1);
        assert_eq!(top, vec![Pair { id: 2, count: 3 }]);
        assert_eq!(field.top_n(5).len(), 2);
    }

    #[test]
    fn reopen_restores_views() {
        let dir = tempfile::tempdir().unwrap();
        create(&dir, FieldOptions::default())
            .set_bit(4, 4, None)
            .unwrap();
        let field = Field::open(dir.path().join("f"), "i", "f").unwrap();
        assert!(field
            .view(VIEW_STANDARD)
            .unwrap()
            .fragment(0)
            .unwrap()
            .contains(4, 4));
    }
}
