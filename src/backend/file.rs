//! Append-only file backend.
//!
//! A store directory holds:
//! - `MANIFEST`: magic bytes and format version
//! - `LOCK`: held exclusively while the backend is open
//! - `data.log`: framed put/delete operations, replayed into memory on open
//!
//! Each frame is `len: u32 | crc32: u32 | rmp-encoded DataOp`. Writes only
//! take effect on replay once a `Commit` frame follows them, so a store
//! closed or crashed mid-transaction reopens without that transaction. The
//! uncommitted tail, and a torn frame at the end, are truncated away on
//! open; a checksum failure anywhere else is reported as corruption.

use super::{Backend, MemoryBackend};
use crate::error::{Result, StoreError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"KDB\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Frame header size (length + checksum).
const FRAME_HEADER_SIZE: usize = 8;

const DATA_FILE: &str = "data.log";

/// A single logged mutation.
#[derive(Debug, Serialize, Deserialize)]
enum DataOp {
    Put {
        table: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        table: String,
        key: String,
    },
    /// Seals every op since the previous commit.
    Commit,
}

/// Durable backend: an in-memory image kept in step with an append-only log.
pub struct FileBackend {
    /// Store directory.
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Append handle on the data log.
    writer: BufWriter<File>,

    /// Live contents.
    image: MemoryBackend,

    /// Writes appended since the last commit frame.
    uncommitted: u64,

    /// Number of writes since last sync.
    writes_since_sync: u64,

    /// Sync every N writes.
    sync_interval: u64,
}

impl FileBackend {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Create a new store directory.
    pub fn create(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Self::write_manifest(&path)?;
        let lock_file = Self::acquire_lock(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path.join(DATA_FILE))?;

        info!(path = %path.display(), "created file backend");

        Ok(Self {
            path,
            _lock_file: lock_file,
            writer: BufWriter::new(file),
            image: MemoryBackend::new(),
            uncommitted: 0,
            writes_since_sync: 0,
            sync_interval: sync_interval.max(1),
        })
    }

    /// Open an existing store directory and replay its log.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::verify_manifest(&path)?;
        let lock_file = Self::acquire_lock(&path)?;

        let data_path = path.join(DATA_FILE);
        let (image, valid_len) = Self::replay(&data_path)?;

        let file = OpenOptions::new().create(true).append(true).open(&data_path)?;
        if file.metadata()?.len() > valid_len {
            warn!(
                path = %data_path.display(),
                valid_len,
                "truncating uncommitted tail of data log"
            );
            file.set_len(valid_len)?;
        }

        info!(path = %path.display(), entries = image.len(), "opened file backend");

        Ok(Self {
            path,
            _lock_file: lock_file,
            writer: BufWriter::new(file),
            image,
            uncommitted: 0,
            writes_since_sync: 0,
            sync_interval: sync_interval.max(1),
        })
    }

    /// Whether `path` holds an initialized store directory.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().join("MANIFEST").is_file()
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, op: &DataOp) -> Result<()> {
        Self::write_frame(&mut self.writer, op)?;

        self.writes_since_sync += 1;
        if self.writes_since_sync >= self.sync_interval {
            self.flush()?;
        }
        Ok(())
    }

    fn write_frame(writer: &mut impl Write, op: &DataOp) -> Result<()> {
        let bytes = rmp_serde::to_vec(op)?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + bytes.len());
        frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&bytes).to_le_bytes());
        frame.extend_from_slice(&bytes);
        writer
            .write_all(&frame)
            .map_err(|e| StoreError::storage("append to data log", e))
    }

    /// Replay the data log. Returns the image and the length of the valid
    /// prefix of the file.
    fn replay(data_path: &Path) -> Result<(MemoryBackend, u64)> {
        let mut image = MemoryBackend::new();
        if !data_path.exists() {
            return Ok((image, 0));
        }

        let mut bytes = Vec::new();
        File::open(data_path)?.read_to_end(&mut bytes)?;

        let mut pending = Vec::new();
        let mut committed = 0usize;
        let mut offset = 0usize;
        while offset + FRAME_HEADER_SIZE <= bytes.len() {
            let len = u32::from_le_bytes(read4(&bytes, offset)) as usize;
            let expected = u32::from_le_bytes(read4(&bytes, offset + 4));
            let start = offset + FRAME_HEADER_SIZE;
            let end = start + len;
            if end > bytes.len() {
                break;
            }

            let body = &bytes[start..end];
            let got = crc32fast::hash(body);
            if got != expected {
                return Err(StoreError::ChecksumMismatch { expected, got });
            }

            offset = end;
            match rmp_serde::from_slice::<DataOp>(body)? {
                DataOp::Commit => {
                    for op in pending.drain(..) {
                        match op {
                            DataOp::Put { table, key, value } => image.put(&table, &key, &value)?,
                            DataOp::Delete { table, key } => image.delete(&table, &key)?,
                            DataOp::Commit => {}
                        }
                    }
                    committed = offset;
                }
                op => pending.push(op),
            }
        }

        if !pending.is_empty() {
            debug!(ops = pending.len(), "discarding uncommitted writes");
        }
        Ok((image, committed as u64))
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST")).map_err(|_| StoreError::NotInitialized)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;
        Ok(lock_file)
    }
}

fn read4(bytes: &[u8], at: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[at..at + 4]);
    out
}

impl Backend for FileBackend {
    fn get(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.image.get(table, key)
    }

    fn put(&mut self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.append(&DataOp::Put {
            table: table.to_string(),
            key: key.to_string(),
            value: value.to_vec(),
        })?;
        self.uncommitted += 1;
        self.image.put(table, key, value)
    }

    fn delete(&mut self, table: &str, key: &str) -> Result<()> {
        self.append(&DataOp::Delete {
            table: table.to_string(),
            key: key.to_string(),
        })?;
        self.uncommitted += 1;
        self.image.delete(table, key)
    }

    fn scan(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.image.scan(table)
    }

    fn commit(&mut self) -> Result<()> {
        if self.uncommitted == 0 {
            return Ok(());
        }
        self.append(&DataOp::Commit)?;
        self.uncommitted = 0;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_all())
            .map_err(|e| StoreError::storage("sync data log", e))?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Rewrite the data log so it only holds live entries, as one commit.
    ///
    /// Uncommitted writes are part of the live image, so callers compact
    /// only between transactions.
    fn compact(&mut self) -> Result<()> {
        self.writer.flush()?;

        let data_path = self.path.join(DATA_FILE);
        let tmp_path = self.path.join("data.log.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for (table, key, value) in self.image.entries() {
                let op = DataOp::Put {
                    table: table.to_string(),
                    key: key.to_string(),
                    value: value.to_vec(),
                };
                Self::write_frame(&mut tmp, &op)?;
            }
            Self::write_frame(&mut tmp, &DataOp::Commit)?;
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &data_path)?;

        let file = OpenOptions::new().append(true).open(&data_path)?;
        self.writer = BufWriter::new(file);
        self.uncommitted = 0;
        self.writes_since_sync = 0;

        debug!(entries = self.image.len(), "compacted data log");
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        {
            let mut backend = FileBackend::create(&path, 100).unwrap();
            backend.put("person", "a", b"alpha").unwrap();
            backend.put("person", "b", b"beta").unwrap();
            backend.delete("person", "a").unwrap();
            backend.put("metadata", "schema_version", b"3").unwrap();
            backend.commit().unwrap();
        }

        let backend = FileBackend::open(&path, 100).unwrap();
        assert_eq!(backend.get("person", "a").unwrap(), None);
        assert_eq!(backend.get("person", "b").unwrap(), Some(b"beta".to_vec()));
        assert_eq!(backend.get("metadata", "schema_version").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        let _first = FileBackend::create(&path, 100).unwrap();
        let second = FileBackend::open(&path, 100);
        assert!(matches!(second, Err(StoreError::Locked)));
    }

    #[test]
    fn test_open_missing_store() {
        let dir = TempDir::new().unwrap();
        let result = FileBackend::open(dir.path().join("nope"), 100);
        assert!(matches!(result, Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        {
            let mut backend = FileBackend::create(&path, 1).unwrap();
            backend.put("note", "n1", b"kept").unwrap();
            backend.commit().unwrap();
        }

        // Simulate a crash halfway through a frame.
        {
            let mut file = OpenOptions::new().append(true).open(path.join(DATA_FILE)).unwrap();
            file.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        }

        let backend = FileBackend::open(&path, 1).unwrap();
        assert_eq!(backend.get("note", "n1").unwrap(), Some(b"kept".to_vec()));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        {
            let mut backend = FileBackend::create(&path, 1).unwrap();
            backend.put("note", "n1", b"payload").unwrap();
            backend.commit().unwrap();
        }

        let data_path = path.join(DATA_FILE);
        let mut bytes = fs::read(&data_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&data_path, bytes).unwrap();

        let result = FileBackend::open(&path, 1);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_compact_keeps_live_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        {
            let mut backend = FileBackend::create(&path, 100).unwrap();
            for i in 0..20 {
                backend.put("event", "e", format!("v{}", i).as_bytes()).unwrap();
                backend.commit().unwrap();
            }
            backend.flush().unwrap();
            let before = fs::metadata(path.join(DATA_FILE)).unwrap().len();
            backend.compact().unwrap();
            let after = fs::metadata(path.join(DATA_FILE)).unwrap().len();
            assert!(after < before);
            backend.put("event", "f", b"later").unwrap();
            backend.commit().unwrap();
        }

        let backend = FileBackend::open(&path, 100).unwrap();
        assert_eq!(backend.get("event", "e").unwrap(), Some(b"v19".to_vec()));
        assert_eq!(backend.get("event", "f").unwrap(), Some(b"later".to_vec()));
    }

    #[test]
    fn test_uncommitted_writes_discarded_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        {
            let mut backend = FileBackend::create(&path, 1).unwrap();
            backend.put("person", "kept", b"1").unwrap();
            backend.commit().unwrap();
            backend.put("person", "lost", b"2").unwrap();
            backend.delete("person", "kept").unwrap();
            // Dropping syncs the open tail to disk without sealing it.
        }

        {
            let mut backend = FileBackend::open(&path, 1).unwrap();
            assert_eq!(backend.get("person", "kept").unwrap(), Some(b"1".to_vec()));
            assert_eq!(backend.get("person", "lost").unwrap(), None);

            // The discarded tail must not be sealed by a later commit.
            backend.put("person", "next", b"3").unwrap();
            backend.commit().unwrap();
        }

        let backend = FileBackend::open(&path, 1).unwrap();
        assert_eq!(backend.get("person", "kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.get("person", "lost").unwrap(), None);
        assert_eq!(backend.get("person", "next").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_commit_without_writes_adds_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        let mut backend = FileBackend::create(&path, 1).unwrap();
        backend.commit().unwrap();
        backend.flush().unwrap();
        assert_eq!(fs::metadata(path.join(DATA_FILE)).unwrap().len(), 0);
    }
}
