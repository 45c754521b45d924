//! Checksummed record containers.
//!
//! Fragments and attribute stores are both saved as a flat list of
//! opaque records. Files are written to a `.tmp` sibling first and
//! renamed into place once complete, so a crash mid-write never leaves a
//! partial file where a reader would find it.
//!
//! Layout:
//! ```text
//! [magic: 4B][version: 1B][record_count: 4B]
//! [record_len: 4B][record]...
//! [footer_crc32: 4B]
//! ```
//! The footer covers every record byte including the length prefixes.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::format::{self, FormatError};

/// Offset of the record count: 4 (magic) + 1 (version).
const COUNT_OFFSET: u64 = 5;

/// Streams records into a file that appears at its final path only after
/// [`finish`](Self::finish) succeeds.
pub struct SnapshotWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    hasher: crc32fast::Hasher,
    count: u32,
    finished: bool,
}

impl SnapshotWriter {
    pub fn create(path: impl Into<PathBuf>, magic: &[u8; 4]) -> Result<Self, FormatError> {
        let final_path = path.into();
        let tmp_path = tmp_path(&final_path);

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        format::write_header(&mut writer, magic)?;
        // patched in finish()
        format::write_u32(&mut writer, 0)?;

        Ok(Self {
            final_path,
            tmp_path,
            writer,
            hasher: crc32fast::Hasher::new(),
            count: 0,
            finished: false,
        })
    }

    pub fn write_record(&mut self, record: &[u8]) -> Result<(), FormatError> {
        let mut buf = Vec::with_capacity(record.len() + 4);
        format::write_bytes(&mut buf, record)?;
        self.hasher.update(&buf);
        self.writer.write_all(&buf)?;
        self.count = self
            .count
            .checked_add(1)
            .ok_or_else(|| FormatError::InvalidData("too many records".into()))?;
        Ok(())
    }

    /// Writes the footer, patches the record count, syncs and renames the
    /// temp file over the final path.
    pub fn finish(mut self) -> Result<(), FormatError> {
        let checksum = self.hasher.clone().finalize();
        format::write_u32(&mut self.writer, checksum)?;
        self.writer.flush()?;

        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        format::write_u32(file, self.count)?;
        file.sync_all()?;

        self.finished = true;
        fs::rename(&self.tmp_path, &self.final_path)?;
        debug!(path = %self.final_path.display(), records = self.count, "snapshot written");
        Ok(())
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// `<name>.tmp` next to `path`.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes a complete container to any writer.
pub fn write_snapshot<R: AsRef<[u8]>>(
    w: &mut impl Write,
    magic: &[u8; 4],
    records: &[R],
) -> Result<(), FormatError> {
    format::write_header(w, magic)?;
    format::write_len(w, records.len())?;
    let mut hasher = crc32fast::Hasher::new();
    for record in records {
        let mut buf = Vec::with_capacity(record.as_ref().len() + 4);
        format::write_bytes(&mut buf, record.as_ref())?;
        hasher.update(&buf);
        w.write_all(&buf)?;
    }
    format::write_u32(w, hasher.finalize())?;
    Ok(())
}

/// Reads a complete container, verifying magic, version and footer.
pub fn read_snapshot(r: &mut impl Read, magic: &[u8; 4]) -> Result<Vec<Vec<u8>>, FormatError> {
    format::read_header(r, magic)?;
    let count = format::read_u32(r)?;
    let mut records = Vec::with_capacity(format::capped_capacity(count));
    let mut hasher = crc32fast::Hasher::new();
    for _ in 0..count {
        let record = format::read_bytes(r)?;
        hasher.update(&(record.len() as u32).to_le_bytes());
        hasher.update(&record);
        records.push(record);
    }
    let stored = format::read_u32(r)?;
    format::verify_crc32_values(hasher.finalize(), stored)?;
    Ok(records)
}

/// Atomically replaces the file at `path` with a container of `records`.
pub fn persist<R: AsRef<[u8]>>(
    path: &Path,
    magic: &[u8; 4],
    records: &[R],
) -> Result<(), FormatError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = SnapshotWriter::create(path, magic)?;
    for record in records {
        writer.write_record(record.as_ref())?;
    }
    writer.finish()
}

/// Loads a container from disk. A missing file yields `None`.
pub fn load(path: &Path, magic: &[u8; 4]) -> Result<Option<Vec<Vec<u8>>>, FormatError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    read_snapshot(&mut reader, magic).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ATTR_MAGIC, FRAGMENT_MAGIC};
    use std::io::Cursor;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("create temp dir")
    }

    #[test]
    fn in_memory_container() {
        let mut buf = Vec::new();
        write_snapshot(&mut buf, FRAGMENT_MAGIC, &[b"one".to_vec(), Vec::new()]).unwrap();
        let records = read_snapshot(&mut Cursor::new(&buf), FRAGMENT_MAGIC).unwrap();
        assert_eq!(records, vec![b"one".to_vec(), Vec::new()]);
    }

    #[test]
    fn file_and_stream_layouts_match() {
        let dir = temp_dir();
        let path = dir.path().join("0");
        let records = [b"a".to_vec(), b"bc".to_vec()];
        persist(&path, ATTR_MAGIC, &records).unwrap();

        let mut buf = Vec::new();
        write_snapshot(&mut buf, ATTR_MAGIC, &records).unwrap();
        assert_eq!(fs::read(&path).unwrap(), buf);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = temp_dir();
        assert!(load(&dir.path().join("absent"), FRAGMENT_MAGIC)
            .unwrap()
            .is_none());
    }

    #[test]
    fn persist_creates_parent_dirs() {
        let dir = temp_dir();
        let path = dir.path().join("views/standard/fragments/3");
        persist(&path, FRAGMENT_MAGIC, &[b"bits"]).unwrap();
        let records = load(&path, FRAGMENT_MAGIC).unwrap().unwrap();
        assert_eq!(records, vec![b"bits".to_vec()]);
    }

    #[test]
    fn corrupt_record_detected() {
        let mut buf = Vec::new();
        write_snapshot(&mut buf, FRAGMENT_MAGIC, &[b"payload"]).unwrap();
        // flip a payload byte: header (5) + count (4) + len (4)
        buf[13] ^= 0xff;
        let err = read_snapshot(&mut Cursor::new(&buf), FRAGMENT_MAGIC).unwrap_err();
        assert!(matches!(err, FormatError::ChecksumMismatch { .. }));
    }

    #[test]
    fn truncated_container_detected() {
        let mut buf = Vec::new();
        write_snapshot(&mut buf, FRAGMENT_MAGIC, &[b"payload"]).unwrap();
        buf.truncate(buf.len() - 2);
        let err = read_snapshot(&mut Cursor::new(&buf), FRAGMENT_MAGIC).unwrap_err();
        assert!(matches!(err, FormatError::UnexpectedEof));
    }

    #[test]
    fn unfinished_writer_leaves_nothing_behind() {
        let dir = temp_dir();
        let path = dir.path().join("7");
        persist(&path, FRAGMENT_MAGIC, &[b"old"]).unwrap();

        {
            let mut writer = SnapshotWriter::create(&path, FRAGMENT_MAGIC).unwrap();
            writer.write_record(b"new").unwrap();
            // dropped without finish()
        }

        let records = load(&path, FRAGMENT_MAGIC).unwrap().unwrap();
        assert_eq!(records, vec![b"old".to_vec()]);
        assert!(!dir.path().join("7.tmp").exists());
    }
}
