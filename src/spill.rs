//! Disk-backed FIFO of opaque byte records.
//!
//! Two files per queue: reads drain `<stem>.qin`, appends go to `<stem>.qout`.
//! When `.qin` is exhausted and records remain in `.qout`, the tail is closed,
//! renamed over the head and a fresh tail is started. Records are framed as a
//! little-endian `u32` length followed by the payload.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SPILL_FORMAT_VERSION: u32 = 1;
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum SpillError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt spill file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unsupported spill format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Record of {0} bytes exceeds the spill frame limit")]
    RecordTooLarge(usize),
}

/// Position and counts needed to reopen a queue from copied files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillManifest {
    pub version: u32,
    pub stem: String,
    pub read_offset: u64,
    pub head_records: u64,
    pub tail_records: u64,
}

#[derive(Debug)]
pub struct SpilloverByteQueue {
    dir: PathBuf,
    stem: String,
    head: Option<BufReader<File>>,
    tail: Option<BufWriter<File>>,
    read_offset: u64,
    head_records: u64,
    tail_records: u64,
    flips: u64,
}

impl SpilloverByteQueue {
    /// A queue whose files live in `dir`. Nothing touches disk until the first append.
    pub fn new<P: AsRef<Path>>(dir: P, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stem: stem.into(),
            head: None,
            tail: None,
            read_offset: 0,
            head_records: 0,
            tail_records: 0,
            flips: 0,
        }
    }

    pub fn head_path(&self) -> PathBuf {
        self.dir.join(format!("{}.qin", self.stem))
    }

    pub fn tail_path(&self) -> PathBuf {
        self.dir.join(format!("{}.qout", self.stem))
    }

    pub fn len(&self) -> u64 {
        self.head_records + self.tail_records
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flips(&self) -> u64 {
        self.flips
    }

    pub fn is_connected(&self) -> bool {
        self.tail.is_some()
    }

    /// Open (or reopen) the backing files at the remembered read position.
    pub fn connect(&mut self) -> Result<(), SpillError> {
        if self.tail.is_some() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;

        // A tail with no counted records may be left over from a failed discard.
        let tail = if self.tail_records == 0 {
            OpenOptions::new().create(true).write(true).truncate(true).open(self.tail_path())?
        } else {
            OpenOptions::new().create(true).append(true).open(self.tail_path())?
        };
        self.tail = Some(BufWriter::new(tail));

        if self.head_records > 0 {
            self.head = Some(self.open_head()?);
        }
        Ok(())
    }

    /// Flush and close the files, keeping the read position for a later `connect`.
    pub fn disconnect(&mut self) -> Result<(), SpillError> {
        if let Some(mut tail) = self.tail.take() {
            tail.flush()?;
        }
        self.head = None;
        Ok(())
    }

    pub fn append(&mut self, record: &[u8]) -> Result<(), SpillError> {
        if record.len() > MAX_RECORD_LEN {
            return Err(SpillError::RecordTooLarge(record.len()));
        }
        self.connect()?;

        let tail = self.tail.as_mut().ok_or_else(|| SpillError::Corrupt {
            path: self.dir.join(&self.stem),
            reason: "tail not open after connect".into(),
        })?;
        tail.write_all(&(record.len() as u32).to_le_bytes())?;
        tail.write_all(record)?;
        self.tail_records += 1;
        Ok(())
    }

    pub fn pop_front(&mut self) -> Result<Option<Vec<u8>>, SpillError> {
        if self.head_records == 0 {
            if self.tail_records == 0 {
                return Ok(None);
            }
            self.flip()?;
        }
        self.connect()?;
        if self.head.is_none() {
            self.head = Some(self.open_head()?);
        }

        let head_path = self.head_path();
        let head = self.head.as_mut().ok_or_else(|| SpillError::Corrupt {
            path: head_path.clone(),
            reason: "head not open".into(),
        })?;

        let mut len_bytes = [0u8; 4];
        head.read_exact(&mut len_bytes).map_err(|e| SpillError::Corrupt {
            path: head_path.clone(),
            reason: format!("missing frame header at offset {}: {}", self.read_offset, e),
        })?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_RECORD_LEN {
            return Err(SpillError::Corrupt {
                path: head_path,
                reason: format!("frame length {} at offset {}", len, self.read_offset),
            });
        }

        let mut record = vec![0u8; len];
        head.read_exact(&mut record).map_err(|e| SpillError::Corrupt {
            path: head_path.clone(),
            reason: format!("short frame at offset {}: {}", self.read_offset, e),
        })?;

        self.read_offset += 4 + len as u64;
        self.head_records -= 1;
        Ok(Some(record))
    }

    /// Promote the tail file to head. Only called once the head is drained.
    fn flip(&mut self) -> Result<(), SpillError> {
        if let Some(mut tail) = self.tail.take() {
            tail.flush()?;
        }
        self.head = None;

        let head_path = self.head_path();
        // rename() replaces atomically on unix; other platforms refuse an existing target.
        if cfg!(not(unix)) && head_path.exists() {
            std::fs::remove_file(&head_path)?;
        }
        std::fs::rename(self.tail_path(), &head_path)?;

        self.head_records = self.tail_records;
        self.tail_records = 0;
        self.read_offset = 0;
        self.flips += 1;

        let fresh_tail = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.tail_path())?;
        self.tail = Some(BufWriter::new(fresh_tail));
        self.head = Some(self.open_head()?);

        tracing::trace!(stem = %self.stem, records = self.head_records, flips = self.flips, "spill flip");
        Ok(())
    }

    fn open_head(&self) -> Result<BufReader<File>, SpillError> {
        let path = self.head_path();
        let mut file = File::open(&path).map_err(|e| SpillError::Corrupt {
            path: path.clone(),
            reason: format!("{} unread records but head unavailable: {}", self.head_records, e),
        })?;
        file.seek(SeekFrom::Start(self.read_offset))?;
        Ok(BufReader::new(file))
    }

    /// Flush buffers and copy both files into `dest`.
    pub fn checkpoint(&mut self, dest: &Path) -> Result<SpillManifest, SpillError> {
        if let Some(tail) = self.tail.as_mut() {
            tail.flush()?;
        }
        std::fs::create_dir_all(dest)?;

        for path in [self.head_path(), self.tail_path()] {
            if path.exists()
                && let Some(name) = path.file_name()
            {
                std::fs::copy(&path, dest.join(name))?;
            }
        }

        Ok(SpillManifest {
            version: SPILL_FORMAT_VERSION,
            stem: self.stem.clone(),
            read_offset: self.read_offset,
            head_records: self.head_records,
            tail_records: self.tail_records,
        })
    }

    /// Rebuild a queue in `dir` from files previously copied to `src` by `checkpoint`.
    pub fn restore<P: AsRef<Path>>(dir: P, src: &Path, manifest: &SpillManifest) -> Result<Self, SpillError> {
        if manifest.version != SPILL_FORMAT_VERSION {
            return Err(SpillError::Version {
                found: manifest.version,
                expected: SPILL_FORMAT_VERSION,
            });
        }

        let mut queue = Self::new(dir, manifest.stem.clone());
        std::fs::create_dir_all(&queue.dir)?;

        for (live, needed) in [
            (queue.head_path(), manifest.head_records > 0),
            (queue.tail_path(), manifest.tail_records > 0),
        ] {
            let name = live.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            let saved = src.join(&name);
            if saved.exists() {
                std::fs::copy(&saved, &live)?;
            } else if needed {
                return Err(SpillError::Corrupt {
                    path: saved,
                    reason: "checkpoint is missing a spill file".into(),
                });
            }
        }

        queue.read_offset = manifest.read_offset;
        queue.head_records = manifest.head_records;
        queue.tail_records = manifest.tail_records;
        Ok(queue)
    }

    /// Forget every record and delete both files. The queue is empty afterwards
    /// even when a file cannot be removed; the first removal error is returned.
    pub fn discard(&mut self) -> Result<(), SpillError> {
        self.tail = None;
        self.head = None;
        self.read_offset = 0;
        self.head_records = 0;
        self.tail_records = 0;

        let mut first_error = None;
        for path in [self.head_path(), self.tail_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(i: usize) -> Vec<u8> {
        format!("record-{:04}", i).into_bytes()
    }

    #[test]
    fn test_fifo_across_flips() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpilloverByteQueue::new(dir.path(), "q");

        for i in 0..5 {
            queue.append(&record(i)).unwrap();
        }
        assert_eq!(queue.pop_front().unwrap(), Some(record(0)));
        assert_eq!(queue.flips(), 1);

        // Appends after the flip land in the fresh tail.
        for i in 5..8 {
            queue.append(&record(i)).unwrap();
        }
        for i in 1..8 {
            assert_eq!(queue.pop_front().unwrap(), Some(record(i)));
        }
        assert_eq!(queue.flips(), 2);
        assert_eq!(queue.pop_front().unwrap(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_records_are_preserved() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpilloverByteQueue::new(dir.path(), "q");
        queue.append(b"").unwrap();
        queue.append(b"x").unwrap();
        assert_eq!(queue.pop_front().unwrap(), Some(Vec::new()));
        assert_eq!(queue.pop_front().unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_disconnect_keeps_read_position() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpilloverByteQueue::new(dir.path(), "q");
        for i in 0..6 {
            queue.append(&record(i)).unwrap();
        }
        assert_eq!(queue.pop_front().unwrap(), Some(record(0)));
        assert_eq!(queue.pop_front().unwrap(), Some(record(1)));

        queue.disconnect().unwrap();
        assert!(!queue.is_connected());
        queue.append(&record(6)).unwrap();

        for i in 2..7 {
            assert_eq!(queue.pop_front().unwrap(), Some(record(i)));
        }
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_checkpoint_restore_mid_flip() {
        let live = TempDir::new().unwrap();
        let snapshot = TempDir::new().unwrap();
        let restored_dir = TempDir::new().unwrap();

        let mut queue = SpilloverByteQueue::new(live.path(), "host");
        for i in 0..4 {
            queue.append(&record(i)).unwrap();
        }
        queue.pop_front().unwrap();
        // Head half consumed, tail holding newer records.
        queue.append(&record(4)).unwrap();
        queue.append(&record(5)).unwrap();

        let manifest = queue.checkpoint(snapshot.path()).unwrap();
        assert_eq!(manifest.head_records, 3);
        assert_eq!(manifest.tail_records, 2);

        let mut restored = SpilloverByteQueue::restore(restored_dir.path(), snapshot.path(), &manifest).unwrap();
        for i in 1..6 {
            assert_eq!(restored.pop_front().unwrap(), Some(record(i)));
            assert_eq!(queue.pop_front().unwrap(), Some(record(i)));
        }
        assert_eq!(restored.pop_front().unwrap(), None);
    }

    #[test]
    fn test_restore_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let manifest = SpillManifest {
            version: SPILL_FORMAT_VERSION + 1,
            stem: "q".into(),
            read_offset: 0,
            head_records: 0,
            tail_records: 0,
        };
        assert!(matches!(
            SpilloverByteQueue::restore(dir.path(), dir.path(), &manifest),
            Err(SpillError::Version { .. })
        ));
    }

    #[test]
    fn test_discard_removes_files() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpilloverByteQueue::new(dir.path(), "q");
        queue.append(&record(0)).unwrap();
        queue.append(&record(1)).unwrap();
        queue.pop_front().unwrap();

        queue.discard().unwrap();
        assert!(!queue.head_path().exists());
        assert!(!queue.tail_path().exists());
        assert_eq!(queue.pop_front().unwrap(), None);
    }

    #[test]
    fn test_discard_empties_queue_when_files_are_unreachable() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("queues");
        std::fs::create_dir_all(&dir).unwrap();
        let mut queue = SpilloverByteQueue::new(&dir, "q");
        queue.append(&record(0)).unwrap();
        queue.append(&record(1)).unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"not a directory").unwrap();
        assert!(queue.discard().is_err());
        assert!(queue.is_empty());

        std::fs::remove_file(&dir).unwrap();
        queue.append(&record(2)).unwrap();
        assert_eq!(queue.pop_front().unwrap(), Some(record(2)));
        assert_eq!(queue.pop_front().unwrap(), None);
    }

    #[test]
    fn test_stale_tail_is_not_read_back() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpilloverByteQueue::new(dir.path(), "q");
        std::fs::write(queue.tail_path(), b"\x05\x00\x00\x00stale").unwrap();

        queue.append(&record(7)).unwrap();
        assert_eq!(queue.pop_front().unwrap(), Some(record(7)));
        assert_eq!(queue.pop_front().unwrap(), None);
    }

    #[test]
    fn test_truncated_frame_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpilloverByteQueue::new(dir.path(), "q");
        queue.append(&record(0)).unwrap();
        queue.disconnect().unwrap();

        let tail = queue.tail_path();
        let bytes = std::fs::read(&tail).unwrap();
        std::fs::write(&tail, &bytes[..bytes.len() - 2]).unwrap();

        assert!(matches!(queue.pop_front(), Err(SpillError::Corrupt { .. })));
    }
}
