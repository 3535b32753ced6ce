//! Already-seen filters keyed by URI fingerprint.
//!
//! `add` is the dedup gate: only the caller that gets `true` back may enqueue
//! the URI. Both stores make that decision atomically per fingerprint without
//! serializing unrelated adds.

use crate::config::{FrontierConfig, SeenStore};
use crate::fingerprint::Fingerprint;
use dashmap::DashSet;
use parking_lot::RwLock;
use redb::{Database, Durability, ReadableTable, TableDefinition};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub const FINGERPRINT_FILE: &str = "fingerprints.bin";
const FINGERPRINT_FILE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SeenError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt fingerprint file: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("Database creation error: {0}")]
    RedbCreate(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
}

pub trait FingerprintSet: Send + Sync {
    /// Mark the URI seen. Returns true only for the first caller.
    fn add(&self, canonical: &str) -> Result<bool, SeenError>;

    /// Forget the URI so it can be scheduled again. Returns whether it was present.
    fn remove(&self, canonical: &str) -> Result<bool, SeenError>;

    fn contains(&self, canonical: &str) -> Result<bool, SeenError>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push buffered state to the backing store.
    fn flush(&self) -> Result<(), SeenError>;

    /// Write every fingerprint to `dir/fingerprints.bin`.
    fn checkpoint(&self, dir: &Path) -> Result<(), SeenError>;

    /// Replace the contents with the fingerprints saved in `dir`.
    fn restore(&self, dir: &Path) -> Result<(), SeenError>;
}

/// Build the store selected by the config.
pub fn open_seen_store(config: &FrontierConfig) -> Result<Arc<dyn FingerprintSet>, SeenError> {
    match config.seen_store {
        SeenStore::Memory => Ok(Arc::new(MemFingerprintSet::new())),
        SeenStore::Redb => Ok(Arc::new(RedbFingerprintSet::open(
            config.seen_db_path(),
            config.seen_flush_batch,
        )?)),
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Sharded hash set for small and medium crawls.
#[derive(Default)]
pub struct MemFingerprintSet {
    seen: DashSet<u64>,
}

impl MemFingerprintSet {
    pub fn new() -> Self {
        Self { seen: DashSet::new() }
    }
}

impl FingerprintSet for MemFingerprintSet {
    fn add(&self, canonical: &str) -> Result<bool, SeenError> {
        Ok(self.seen.insert(Fingerprint::of(canonical).as_u64()))
    }

    fn remove(&self, canonical: &str) -> Result<bool, SeenError> {
        Ok(self.seen.remove(&Fingerprint::of(canonical).as_u64()).is_some())
    }

    fn contains(&self, canonical: &str) -> Result<bool, SeenError> {
        Ok(self.seen.contains(&Fingerprint::of(canonical).as_u64()))
    }

    fn len(&self) -> u64 {
        self.seen.len() as u64
    }

    fn flush(&self) -> Result<(), SeenError> {
        Ok(())
    }

    fn checkpoint(&self, dir: &Path) -> Result<(), SeenError> {
        let mut all: Vec<u64> = self.seen.iter().map(|fp| *fp).collect();
        all.sort_unstable();
        write_fingerprint_file(&dir.join(FINGERPRINT_FILE), &all)
    }

    fn restore(&self, dir: &Path) -> Result<(), SeenError> {
        let saved = read_fingerprint_file(&dir.join(FINGERPRINT_FILE))?;
        self.seen.clear();
        for fp in saved {
            self.seen.insert(fp);
        }
        Ok(())
    }
}

// ============================================================================
// REDB-BACKED
// ============================================================================

/// Fingerprints as keys of an ordered on-disk table, for crawls larger than memory.
///
/// New fingerprints collect in `pending` and are committed in batches. Adders
/// hold the gate shared; a batch commit holds it exclusively, so a fingerprint
/// is never visible as absent in both places at once.
pub struct RedbFingerprintSet {
    db: Database,
    pending: DashSet<u64>,
    gate: RwLock<()>,
    committed: AtomicU64,
    flush_batch: usize,
}

impl RedbFingerprintSet {
    const SEEN: TableDefinition<'static, u64, u8> = TableDefinition::new("seen");

    pub fn open<P: AsRef<Path>>(path: P, flush_batch: usize) -> Result<Self, SeenError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path.as_ref())?;

        // Create the table up front so read transactions can always open it.
        let write_txn = db.begin_write()?;
        {
            let _seen = write_txn.open_table(Self::SEEN)?;
        }
        write_txn.commit()?;

        let committed = {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(Self::SEEN)?;
            table.iter()?.count() as u64
        };

        tracing::debug!(path = %path.as_ref().display(), committed, "opened redb seen store");

        Ok(Self {
            db,
            pending: DashSet::new(),
            gate: RwLock::new(()),
            committed: AtomicU64::new(committed),
            flush_batch: flush_batch.max(1),
        })
    }

    fn committed_contains(&self, fp: u64) -> Result<bool, SeenError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::SEEN)?;
        Ok(table.get(fp)?.is_some())
    }

    /// Commit the pending buffer. Caller must hold the gate exclusively.
    fn commit_pending(&self, durability: Durability) -> Result<(), SeenError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut write_txn = self.db.begin_write()?;
        write_txn.set_durability(durability);
        let mut inserted = 0u64;
        {
            let mut table = write_txn.open_table(Self::SEEN)?;
            for fp in self.pending.iter() {
                if table.insert(*fp, 1u8)?.is_none() {
                    inserted += 1;
                }
            }
        }
        write_txn.commit()?;

        self.committed.fetch_add(inserted, Ordering::Relaxed);
        self.pending.clear();
        Ok(())
    }
}

impl FingerprintSet for RedbFingerprintSet {
    fn add(&self, canonical: &str) -> Result<bool, SeenError> {
        let fp = Fingerprint::of(canonical).as_u64();
        let buffered = {
            let _shared = self.gate.read();
            if self.pending.contains(&fp) || self.committed_contains(fp)? {
                return Ok(false);
            }
            if !self.pending.insert(fp) {
                return Ok(false);
            }
            self.pending.len()
        };

        if buffered >= self.flush_batch {
            let _exclusive = self.gate.write();
            self.commit_pending(Durability::Eventual)?;
        }
        Ok(true)
    }

    fn remove(&self, canonical: &str) -> Result<bool, SeenError> {
        let fp = Fingerprint::of(canonical).as_u64();
        let _exclusive = self.gate.write();

        if self.pending.remove(&fp).is_some() {
            return Ok(true);
        }

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(Self::SEEN)?;
            let removed = table.remove(fp)?.is_some();
            removed
        };
        write_txn.commit()?;

        if removed {
            self.committed.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn contains(&self, canonical: &str) -> Result<bool, SeenError> {
        let fp = Fingerprint::of(canonical).as_u64();
        let _shared = self.gate.read();
        Ok(self.pending.contains(&fp) || self.committed_contains(fp)?)
    }

    fn len(&self) -> u64 {
        self.committed.load(Ordering::Relaxed) + self.pending.len() as u64
    }

    fn flush(&self) -> Result<(), SeenError> {
        let _exclusive = self.gate.write();
        self.commit_pending(Durability::Immediate)
    }

    fn checkpoint(&self, dir: &Path) -> Result<(), SeenError> {
        let _exclusive = self.gate.write();
        self.commit_pending(Durability::Immediate)?;

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(Self::SEEN)?;
        let mut all = Vec::with_capacity(self.committed.load(Ordering::Relaxed) as usize);
        for entry in table.iter()? {
            let (key, _value) = entry?;
            all.push(key.value());
        }
        // redb iterates u64 keys in ascending order already.
        write_fingerprint_file(&dir.join(FINGERPRINT_FILE), &all)
    }

    fn restore(&self, dir: &Path) -> Result<(), SeenError> {
        let saved = read_fingerprint_file(&dir.join(FINGERPRINT_FILE))?;
        let _exclusive = self.gate.write();
        self.pending.clear();

        let write_txn = self.db.begin_write()?;
        {
            write_txn.delete_table(Self::SEEN)?;
            let mut table = write_txn.open_table(Self::SEEN)?;
            for fp in &saved {
                table.insert(*fp, 1u8)?;
            }
        }
        write_txn.commit()?;

        self.committed.store(saved.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// CHECKPOINT FILE
// ============================================================================

// Layout: u32 version, u64 count, then `count` big-endian u64 fingerprints.
fn write_fingerprint_file(path: &Path, fingerprints: &[u64]) -> Result<(), SeenError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&FINGERPRINT_FILE_VERSION.to_le_bytes())?;
    writer.write_all(&(fingerprints.len() as u64).to_le_bytes())?;
    for fp in fingerprints {
        writer.write_all(&fp.to_be_bytes())?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn read_fingerprint_file(path: &Path) -> Result<Vec<u64>, SeenError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    let version = u32::from_le_bytes(version);
    if version != FINGERPRINT_FILE_VERSION {
        return Err(SeenError::Corrupt(format!("unsupported version {}", version)));
    }

    let mut count = [0u8; 8];
    reader.read_exact(&mut count)?;
    let count = u64::from_le_bytes(count);

    let mut fingerprints = Vec::with_capacity(count.min(1 << 24) as usize);
    let mut buf = [0u8; 8];
    for i in 0..count {
        reader
            .read_exact(&mut buf)
            .map_err(|e| SeenError::Corrupt(format!("truncated after {} of {} entries: {}", i, count, e)))?;
        fingerprints.push(u64::from_be_bytes(buf));
    }
    Ok(fingerprints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn exercise_idempotence(set: &dyn FingerprintSet) {
        let uri = "http://example.com/a";
        assert!(set.add(uri).unwrap());
        assert!(!set.add(uri).unwrap());
        assert!(set.contains(uri).unwrap());

        assert!(set.remove(uri).unwrap());
        assert!(!set.contains(uri).unwrap());
        assert!(set.add(uri).unwrap());
    }

    #[test]
    fn test_mem_dedup_idempotence() {
        exercise_idempotence(&MemFingerprintSet::new());
    }

    #[test]
    fn test_redb_dedup_idempotence() {
        let dir = TempDir::new().unwrap();
        // A batch of one forces every add through a commit.
        let set = RedbFingerprintSet::open(dir.path().join("seen.redb"), 1).unwrap();
        exercise_idempotence(&set);

        let buffered = RedbFingerprintSet::open(dir.path().join("buffered.redb"), 1000).unwrap();
        exercise_idempotence(&buffered);
    }

    #[test]
    fn test_redb_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seen.redb");
        {
            let set = RedbFingerprintSet::open(&path, 100).unwrap();
            for i in 0..10 {
                set.add(&format!("http://example.com/{}", i)).unwrap();
            }
            set.flush().unwrap();
        }

        let set = RedbFingerprintSet::open(&path, 100).unwrap();
        assert_eq!(set.len(), 10);
        assert!(set.contains("http://example.com/3").unwrap());
        assert!(!set.add("http://example.com/3").unwrap());
    }

    #[test]
    fn test_concurrent_adds_have_single_winner() {
        let dir = TempDir::new().unwrap();
        let stores: Vec<Arc<dyn FingerprintSet>> = vec![
            Arc::new(MemFingerprintSet::new()),
            Arc::new(RedbFingerprintSet::open(dir.path().join("seen.redb"), 7).unwrap()),
        ];

        for store in stores {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        (0..200)
                            .filter(|i| store.add(&format!("http://example.com/{}", i)).unwrap())
                            .count()
                    })
                })
                .collect();

            let winners: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
            assert_eq!(winners, 200);
            assert_eq!(store.len(), 200);
        }
    }

    #[test]
    fn test_checkpoint_restore_across_stores() {
        let dir = TempDir::new().unwrap();
        let mem = MemFingerprintSet::new();
        for i in 0..50 {
            mem.add(&format!("http://example.com/{}", i)).unwrap();
        }
        mem.checkpoint(dir.path()).unwrap();

        let redb = RedbFingerprintSet::open(dir.path().join("seen.redb"), 10).unwrap();
        redb.add("http://stale.example/").unwrap();
        redb.restore(dir.path()).unwrap();

        assert_eq!(redb.len(), 50);
        assert!(redb.contains("http://example.com/49").unwrap());
        assert!(!redb.contains("http://stale.example/").unwrap());
    }

    #[test]
    fn test_truncated_checkpoint_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let mem = MemFingerprintSet::new();
        mem.add("http://example.com/").unwrap();
        mem.add("http://example.com/2").unwrap();
        mem.checkpoint(dir.path()).unwrap();

        let path = dir.path().join(FINGERPRINT_FILE);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(MemFingerprintSet::new().restore(dir.path()), Err(SeenError::Corrupt(_))));
    }
}
