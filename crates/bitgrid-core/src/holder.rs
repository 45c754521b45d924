//! The holder: root of the storage hierarchy on one node.
//!
//! Lays out data as `<root>/<index>/<field>/views/<view>/fragments/<slice>`
//! and hands out shared handles to each level.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::field::{Field, FieldOptions};
use crate::fragment::Fragment;
use crate::index::{Index, IndexOptions};
use crate::name::validate_name;
use crate::view::View;
use crate::StorageError;

/// Schema entry for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub options: FieldOptions,
    pub views: Vec<String>,
}

/// Schema entry for one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub options: IndexOptions,
    pub fields: Vec<FieldInfo>,
}

/// All indexes stored on this node.
#[derive(Debug)]
pub struct Holder {
    path: PathBuf,
    indexes: RwLock<BTreeMap<String, Arc<Index>>>,
}

impl Holder {
    /// Opens the data directory, creating it if needed, and every index
    /// found inside.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        let mut indexes = BTreeMap::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_name(&name).is_err() {
                warn!(dir = %name, "skipping invalid index directory");
                continue;
            }
            let index = Index::open(entry.path(), &name)?;
            indexes.insert(name, Arc::new(index));
        }
        info!(path = %path.display(), indexes = indexes.len(), "opened holder");
        Ok(Self {
            path,
            indexes: RwLock::new(indexes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(&self) -> Result<(), StorageError> {
        let mut indexes = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        for index in indexes.values() {
            index.close()?;
        }
        indexes.clear();
        Ok(())
    }

    pub fn index(&self, name: &str) -> Option<Arc<Index>> {
        let indexes = self.indexes.read().unwrap_or_else(|e| e.into_inner());
        indexes.get(name).cloned()
    }

    /// All indexes, ordered by name.
    pub fn indexes(&self) -> Vec<Arc<Index>> {
        let indexes = self.indexes.read().unwrap_or_else(|e| e.into_inner());
        indexes.values().cloned().collect()
    }

    pub fn create_index(
        &self,
        name: &str,
        options: IndexOptions,
    ) -> Result<Arc<Index>, StorageError> {
        let mut indexes = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        if indexes.contains_key(name) {
            return Err(StorageError::IndexExists(name.to_string()));
        }
        self.insert_index(&mut indexes, name, options)
    }

    pub fn create_index_if_not_exists(
        &self,
        name: &str,
        options: IndexOptions,
    ) -> Result<Arc<Index>, StorageError> {
        let mut indexes = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = indexes.get(name) {
            return Ok(Arc::clone(index));
        }
        self.insert_index(&mut indexes, name, options)
    }

    fn insert_index(
        &self,
        indexes: &mut BTreeMap<String, Arc<Index>>,
        name: &str,
        options: IndexOptions,
    ) -> Result<Arc<Index>, StorageError> {
        let index = Arc::new(Index::create(self.path.join(name), name, options)?);
        indexes.insert(name.to_string(), Arc::clone(&index));
        info!(index = name, "created index");
        Ok(index)
    }

    /// Closes an index and removes its directory. Absent indexes are ignored.
    pub fn delete_index(&self, name: &str) -> Result<(), StorageError> {
        let mut indexes = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        let Some(index) = indexes.get(name).cloned() else {
            return Ok(());
        };
        index.close()?;
        fs::remove_dir_all(index.path())?;
        indexes.remove(name);
        info!(index = name, "deleted index");
        Ok(())
    }

    pub fn field(&self, index: &str, field: &str) -> Option<Arc<Field>> {
        self.index(index)?.field(field)
    }

    pub fn view(&self, index: &str, field: &str, view: &str) -> Option<Arc<View>> {
        self.field(index, field)?.view(view)
    }

    pub fn fragment(
        &self,
        index: &str,
        field: &str,
        view: &str,
        slice: u64,
    ) -> Option<Arc<Fragment>> {
        self.view(index, field, view)?.fragment(slice)
    }

    /// Every index with its fields and their views.
    pub fn schema(&self) -> Vec<IndexInfo> {
        self.indexes()
            .iter()
            .map(|index| IndexInfo {
                name: index.name().to_string(),
                options: index.options().clone(),
                fields: index
                    .fields()
                    .iter()
                    .map(|field| FieldInfo {
                        name: field.name().to_string(),
                        options: field.options().clone(),
                        views: field.views().iter().map(|v| v.name().to_string()).collect(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Max slice per index.
    pub fn max_slices(&self) -> BTreeMap<String, u64> {
        self.indexes()
            .iter()
            .map(|index| (index.name().to_string(), index.max_slice()))
            .collect()
    }

    /// Records a slice created on another node. Unknown indexes are ignored.
    pub fn set_remote_max_slice(&self, index: &str, slice: u64) {
        if let Some(index) = self.index(index) {
            index.set_remote_max_slice(slice);
        }
    }

    pub fn recalculate_caches(&self) {
        for index in self.indexes() {
            index.recalculate_caches();
        }
    }
}
