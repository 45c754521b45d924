//! Per-fragment row count caches used to answer top-N queries.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::StorageError;

/// Default number of rows tracked per fragment.
pub const DEFAULT_CACHE_SIZE: u32 = 50_000;

/// How a field keeps its row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Keeps the highest counts, ordered by count.
    #[default]
    Ranked,
    /// Keeps the most recently touched rows.
    Lru,
    /// No cache; top-N answers are empty.
    None,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Ranked => "ranked",
            CacheType::Lru => "lru",
            CacheType::None => "none",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ranked" => Ok(CacheType::Ranked),
            "lru" => Ok(CacheType::Lru),
            "none" => Ok(CacheType::None),
            other => Err(StorageError::InvalidCacheType(other.to_string())),
        }
    }
}

/// A row id and its bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub id: u64,
    pub count: u64,
}

/// Sorts pairs by descending count, then ascending id.
pub fn sort_pairs(pairs: &mut [Pair]) {
    pairs.sort_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
}

/// Row count cache of one fragment.
#[derive(Debug)]
pub enum RowCache {
    Ranked(RankedCache),
    Lru(LruCache<u64, u64>),
    None,
}

impl RowCache {
    pub fn new(cache_type: CacheType, size: u32) -> Self {
        let size = (size as usize).max(1);
        match cache_type {
            CacheType::Ranked => RowCache::Ranked(RankedCache::new(size)),
            CacheType::Lru => RowCache::Lru(LruCache::new(
                NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN),
            )),
            CacheType::None => RowCache::None,
        }
    }

    /// Records the current count of a row. A zero count removes it.
    pub fn add(&mut self, id: u64, count: u64) {
        match self {
            RowCache::Ranked(c) => c.add(id, count),
            RowCache::Lru(c) => {
                if count == 0 {
                    c.pop(&id);
                } else {
                    c.put(id, count);
                }
            }
            RowCache::None => {}
        }
    }

    pub fn get(&self, id: u64) -> Option<u64> {
        match self {
            RowCache::Ranked(c) => c.entries.get(&id).copied(),
            RowCache::Lru(c) => c.peek(&id).copied(),
            RowCache::None => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowCache::Ranked(c) => c.entries.len(),
            RowCache::Lru(c) => c.len(),
            RowCache::None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything, e.g. before a full rebuild.
    pub fn clear(&mut self) {
        match self {
            RowCache::Ranked(c) => {
                c.entries.clear();
                c.rankings.clear();
                c.dirty = false;
            }
            RowCache::Lru(c) => c.clear(),
            RowCache::None => {}
        }
    }

    /// Re-sorts the rankings.
    pub fn recalculate(&mut self) {
        if let RowCache::Ranked(c) = self {
            c.recalculate();
        }
    }

    /// Cached pairs, highest count first.
    pub fn top(&mut self) -> Vec<Pair> {
        match self {
            RowCache::Ranked(c) => {
                if c.dirty {
                    c.recalculate();
                }
                c.rankings.clone()
            }
            RowCache::Lru(c) => {
                let mut pairs: Vec<Pair> =
                    c.iter().map(|(id, count)| Pair { id: *id, count: *count }).collect();
                sort_pairs(&mut pairs);
                pairs
            }
            RowCache::None => Vec::new(),
        }
    }
}

/// Keeps up to `size` rows with the highest counts.
#[derive(Debug)]
pub struct RankedCache {
    size: usize,
    entries: HashMap<u64, u64>,
    rankings: Vec<Pair>,
    dirty: bool,
}

impl RankedCache {
    fn new(size: usize) -> Self {
        Self {
            size,
            entries: HashMap::new(),
            rankings: Vec::new(),
            dirty: false,
        }
    }

    fn add(&mut self, id: u64, count: u64) {
        if count == 0 {
            self.entries.remove(&id);
        } else {
            self.entries.insert(id, count);
        }
        self.dirty = true;
        // let the map grow a little past its size before trimming
        if self.entries.len() > self.size + self.size / 10 {
            self.recalculate();
        }
    }

    fn recalculate(&mut self) {
        let mut pairs: Vec<Pair> = self
            .entries
            .iter()
            .map(|(id, count)| Pair { id: *id, count: *count })
            .collect();
        sort_pairs(&mut pairs);
        pairs.truncate(self.size);
        self.entries = pairs.iter().map(|p| (p.id, p.count)).collect();
        self.rankings = pairs;
        self.dirty = false;
    }
}
