//! bitgrid-core: the bitmap storage hierarchy.
//!
//! A [`Holder`] owns indexes, an [`Index`] owns fields and column
//! attributes, a [`Field`] owns views and row attributes, a [`View`] owns
//! one [`Fragment`] per slice. Fragments and attribute stores expose
//! checksummed blocks so replicas can find and repair differences.

pub mod attrs;
pub mod blocks;
pub mod cache;
pub mod error;
pub mod field;
pub mod fragment;
pub mod holder;
pub mod index;
pub mod name;
pub mod time;
pub mod view;

pub use attrs::{AttrMap, AttrStore, AttrValue, Attrs, ATTR_BLOCK_SIZE};
pub use blocks::{Block, BlockSource, Checksum};
pub use cache::{CacheType, Pair, DEFAULT_CACHE_SIZE};
pub use error::StorageError;
pub use field::{Field, FieldKind, FieldOptions};
pub use fragment::{validate_slice, BlockData, Fragment, HASH_BLOCK_SIZE, MAX_SLICE, SLICE_WIDTH};
pub use holder::{FieldInfo, Holder, IndexInfo};
pub use index::{Index, IndexOptions};
pub use name::{validate_name, validate_view_name};
pub use time::{TimeQuantum, VIEW_BSI, VIEW_STANDARD};
pub use view::View;
