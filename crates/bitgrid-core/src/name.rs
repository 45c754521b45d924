//! Index, field and view name validation.

use crate::time::{VIEW_BSI, VIEW_STANDARD};
use crate::StorageError;

/// Longest accepted name.
pub const MAX_NAME_LEN: usize = 64;

/// Checks that `name` starts with a lowercase letter, continues with
/// lowercase letters, digits, `_` or `-`, and is at most 64 bytes.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_rest =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid_start && valid_rest && name.len() <= MAX_NAME_LEN {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// Checks that `name` is a view this crate can produce: `standard`,
/// `bsig`, or a time view `standard_` followed by a `YYYY`, `YYYYMM`,
/// `YYYYMMDD` or `YYYYMMDDHH` bucket.
///
/// View names arrive from peers and become directory names, so anything
/// else is refused.
pub fn validate_view_name(name: &str) -> Result<(), StorageError> {
    let valid = name == VIEW_STANDARD
        || name == VIEW_BSI
        || name
            .strip_prefix(VIEW_STANDARD)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|bucket| {
                matches!(bucket.len(), 4 | 6 | 8 | 10)
                    && bucket.bytes().all(|b| b.is_ascii_digit())
            });
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidViewName(name.to_string()))
    }
}
