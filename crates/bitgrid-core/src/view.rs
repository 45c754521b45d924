//! A named view of a field: one fragment per slice, created on demand.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::cache::CacheType;
use crate::fragment::{validate_slice, Fragment};
use crate::StorageError;

/// Fragments of one view, keyed by slice.
#[derive(Debug)]
pub struct View {
    path: PathBuf,
    name: String,
    cache_type: CacheType,
    cache_size: u32,
    fragments: RwLock<BTreeMap<u64, Arc<Fragment>>>,
}

impl View {
    /// Opens the view at `path`, loading every fragment file found in
    /// its `fragments` directory.
    pub fn open(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        cache_type: CacheType,
        cache_size: u32,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let view = Self {
            path,
            name: name.into(),
            cache_type,
            cache_size,
            fragments: RwLock::new(BTreeMap::new()),
        };
        fs::create_dir_all(view.fragments_path())?;
        view.open_fragments()?;
        Ok(view)
    }

    fn open_fragments(&self) -> Result<(), StorageError> {
        let mut fragments = self.fragments.write().unwrap_or_else(|e| e.into_inner());
        for entry in fs::read_dir(self.fragments_path())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let slice = file_name.to_str().and_then(|s| s.parse::<u64>().ok());
            let Some(slice) = slice.filter(|&s| validate_slice(s).is_ok()) else {
                // leftover temp files and other strays
                warn!(path = %entry.path().display(), "skipping unknown file in fragments dir");
                continue;
            };
            let fragment = Fragment::open(entry.path(), slice, self.cache_type, self.cache_size)?;
            fragments.insert(slice, Arc::new(fragment));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fragments_path(&self) -> PathBuf {
        self.path.join("fragments")
    }

    pub fn fragment(&self, slice: u64) -> Option<Arc<Fragment>> {
        let fragments = self.fragments.read().unwrap_or_else(|e| e.into_inner());
        fragments.get(&slice).cloned()
    }

    /// All fragments, ordered by slice.
    pub fn fragments(&self) -> Vec<Arc<Fragment>> {
        let fragments = self.fragments.read().unwrap_or_else(|e| e.into_inner());
        fragments.values().cloned().collect()
    }

    pub fn create_fragment_if_not_exists(&self, slice: u64) -> Result<Arc<Fragment>, StorageError> {
        validate_slice(slice)?;
        let mut fragments = self.fragments.write().unwrap_or_else(|e| e.into_inner());
        if let Some(fragment) = fragments.get(&slice) {
            return Ok(Arc::clone(fragment));
        }
        let path = self.fragments_path().join(slice.to_string());
        let fragment = Arc::new(Fragment::open(
            path,
            slice,
            self.cache_type,
            self.cache_size,
        )?);
        fragments.insert(slice, Arc::clone(&fragment));
        Ok(fragment)
    }

    /// Highest slice with a fragment, or zero.
    pub fn max_slice(&self) -> u64 {
        let fragments = self.fragments.read().unwrap_or_else(|e| e.into_inner());
        fragments.keys().next_back().copied().unwrap_or(0)
    }

    pub fn recalculate_caches(&self) {
        for fragment in self.fragments() {
            fragment.recalculate_cache();
        }
    }

    /// Flushes every fragment and forgets them.
    pub fn close(&self) -> Result<(), StorageError> {
        let mut fragments = self.fragments.write().unwrap_or_else(|e| e.into_inner());
        for fragment in fragments.values() {
            fragment.flush()?;
        }
        fragments.clear();
        Ok(())
    }
}
