//! Error types for the storage hierarchy.

use std::io;

use bitgrid_persistence::FormatError;
use thiserror::Error;

/// Errors returned by holder, index, field, view and fragment operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid name {0:?}: must match [a-z][a-z0-9_-]{{0,63}}")]
    InvalidName(String),

    #[error("invalid view name {0:?}")]
    InvalidViewName(String),

    #[error("slice {0} is beyond the addressable column range")]
    SliceOutOfRange(u64),

    #[error("index {0} already exists")]
    IndexExists(String),

    #[error("index {0} not found")]
    IndexNotFound(String),

    #[error("field {0} already exists")]
    FieldExists(String),

    #[error("field {0} not found")]
    FieldNotFound(String),

    #[error("view {0} not found")]
    ViewNotFound(String),

    #[error("fragment not found")]
    FragmentNotFound,

    #[error("invalid cache type {0:?}")]
    InvalidCacheType(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Parallel import arrays of different lengths.
    #[error("mismatched import lengths: {0} vs {1}")]
    LengthMismatch(usize, usize),

    #[error("column {column} does not belong to slice {slice}")]
    ColumnOutOfSlice { column: u64, slice: u64 },

    #[error("field {0} does not hold integer values")]
    NotIntField(String),

    #[error("value {value} out of range [{min}, {max}]")]
    ValueOutOfRange { value: i64, min: i64, max: i64 },

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// True for the "absent" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::IndexNotFound(_)
                | StorageError::FieldNotFound(_)
                | StorageError::ViewNotFound(_)
                | StorageError::FragmentNotFound
        )
    }
}
