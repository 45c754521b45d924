//! JSON metadata files (`.meta`) for indexes and fields.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::format::FormatError;
use crate::snapshot::tmp_path;

/// Atomically writes `value` as pretty-printed JSON to `path`.
pub fn write_meta<T: Serialize>(path: &Path, value: &T) -> Result<(), FormatError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let result = write_and_rename(&tmp, path, value);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename<T: Serialize>(tmp: &Path, path: &Path, value: &T) -> Result<(), FormatError> {
    let mut writer = BufWriter::new(File::create(tmp)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}

/// Reads a meta file. A missing file yields `None`.
pub fn read_meta<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FormatError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}
