//! bitgrid-persistence: on-disk file formats.
//!
//! Checksummed record containers for fragments and attribute stores,
//! and JSON metadata files for indexes and fields. Every writer goes
//! through a temp file and a rename.

pub mod format;
pub mod meta;
pub mod snapshot;

pub use format::FormatError;
