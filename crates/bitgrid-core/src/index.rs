//! Indexes: a named collection of fields sharing one column space.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bitgrid_persistence::meta;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attrs::AttrStore;
use crate::field::{Field, FieldOptions};
use crate::name::validate_name;
use crate::StorageError;

/// Options an index is created with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Whether columns are addressed by string keys.
    pub keys: bool,
}

#[derive(Debug, Default)]
struct Inner {
    fields: BTreeMap<String, Arc<Field>>,
    /// Highest slice reported by other nodes.
    remote_max_slice: u64,
}

/// A named index on disk at `<holder>/<name>`.
#[derive(Debug)]
pub struct Index {
    path: PathBuf,
    name: String,
    options: IndexOptions,
    inner: RwLock<Inner>,
    column_attrs: AttrStore,
}

impl Index {
    /// Opens an index directory, creating it if missing, and opens every
    /// field found inside.
    pub fn open(path: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self, StorageError> {
        let path = path.into();
        let name = name.into();
        validate_name(&name)?;
        fs::create_dir_all(&path)?;
        let options = meta::read_meta(&path.join(".meta"))?.unwrap_or_default();
        Self::open_with(path, name, options)
    }

    /// Creates a new index directory and persists its options.
    pub fn create(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        options: IndexOptions,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let name = name.into();
        validate_name(&name)?;
        fs::create_dir_all(&path)?;
        meta::write_meta(&path.join(".meta"), &options)?;
        Self::open_with(path, name, options)
    }

    fn open_with(path: PathBuf, name: String, options: IndexOptions) -> Result<Self, StorageError> {
        let mut fields = BTreeMap::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(field_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_name(&field_name).is_err() {
                warn!(index = %name, dir = %field_name, "skipping invalid field directory");
                continue;
            }
            let field = Field::open(entry.path(), &name, &field_name)?;
            fields.insert(field_name, Arc::new(field));
        }
        let column_attrs = AttrStore::open(path.join(".data"))?;
        debug!(index = %name, fields = fields.len(), "opened index");
        Ok(Self {
            path,
            name,
            options,
            inner: RwLock::new(Inner {
                fields,
                remote_max_slice: 0,
            }),
            column_attrs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn column_attr_store(&self) -> &AttrStore {
        &self.column_attrs
    }

    pub fn field(&self, name: &str) -> Option<Arc<Field>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.fields.get(name).cloned()
    }

    /// All fields, ordered by name.
    pub fn fields(&self) -> Vec<Arc<Field>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.fields.values().cloned().collect()
    }

    pub fn create_field(
        &self,
        name: &str,
        options: FieldOptions,
    ) -> Result<Arc<Field>, StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.fields.contains_key(name) {
            return Err(StorageError::FieldExists(name.to_string()));
        }
        self.insert_field(&mut inner, name, options)
    }

    /// Returns the existing field, or creates it with `options`.
    pub fn create_field_if_not_exists(
        &self,
        name: &str,
        options: FieldOptions,
    ) -> Result<Arc<Field>, StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(field) = inner.fields.get(name) {
            return Ok(Arc::clone(field));
        }
        self.insert_field(&mut inner, name, options)
    }

    fn insert_field(
        &self,
        inner: &mut Inner,
        name: &str,
        options: FieldOptions,
    ) -> Result<Arc<Field>, StorageError> {
        let field = Arc::new(Field::create(
            self.path.join(name),
            &self.name,
            name,
            options,
        )?);
        inner.fields.insert(name.to_string(), Arc::clone(&field));
        info!(index = %self.name, field = name, "created field");
        Ok(field)
    }

    /// Closes a field and removes its directory. Absent fields are ignored.
    pub fn delete_field(&self, name: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(field) = inner.fields.get(name).cloned() else {
            return Ok(());
        };
        field.close()?;
        fs::remove_dir_all(field.path())?;
        inner.fields.remove(name);
        info!(index = %self.name, field = name, "deleted field");
        Ok(())
    }

    /// Highest slice known for this index, local or remote.
    pub fn max_slice(&self) -> u64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .fields
            .values()
            .map(|f| f.max_slice())
            .fold(inner.remote_max_slice, u64::max)
    }

    /// Records a slice another node created. Never lowers the value.
    pub fn set_remote_max_slice(&self, slice: u64) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remote_max_slice = inner.remote_max_slice.max(slice);
    }

    pub fn recalculate_caches(&self) {
        for field in self.fields() {
            field.recalculate_caches();
        }
    }

    pub fn close(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for field in inner.fields.values() {
            field.close()?;
        }
        inner.fields.clear();
        Ok(())
    }
}
