//! Per-key work queue.
//!
//! ```text
//! EMPTY --enqueue--> READY --dequeue+note_in_process--> IN_PROCESS
//! IN_PROCESS --note_process_done--> READY | EMPTY | SNOOZED
//! SNOOZED --wake (wake time passed)--> READY | EMPTY
//! ```
//!
//! Pending entries sit in three lanes served in order: prerequisites, HIGH,
//! then the bulk lane (MEDIUM/NORMAL/LOW in arrival order). The first two
//! lanes are always in memory. The bulk lane keeps its head in memory and
//! spills the rest into a [`SpilloverByteQueue`] once `memory_cap` entries are
//! held, or as soon as anything is already on disk so FIFO order is kept.

use crate::candidate::{CandidateUri, CodecError, Priority};
use crate::spill::{SpillError, SpillManifest, SpilloverByteQueue};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

const LANES_FILE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue {key} has nothing pending")]
    Empty { key: String },

    #[error("Invariant violation on queue {key}: {detail}")]
    InvariantViolation { key: String, detail: String },

    #[error("Queue {key} is unavailable after a storage failure")]
    Unavailable { key: String },

    #[error("Spill failure on queue {key}: {source}")]
    Spill {
        key: String,
        #[source]
        source: SpillError,
    },

    #[error("Codec failure on queue {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("Checkpoint failure on queue {key}: {source}")]
    Checkpoint {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Empty,
    Ready,
    InProcess,
    Snoozed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Prerequisite = 0,
    High = 1,
    Bulk = 2,
}

impl Lane {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Lane::Prerequisite),
            1 => Some(Lane::High),
            2 => Some(Lane::Bulk),
            _ => None,
        }
    }
}

/// What a checkpoint needs besides the copied files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCheckpoint {
    pub key: String,
    pub stem: String,
    pub state: QueueState,
    /// Remaining snooze at checkpoint time.
    pub wake_in_ms: Option<u64>,
    pub memory_entries: u64,
    pub error_count: u64,
    pub unavailable: bool,
    pub spill: SpillManifest,
}

/// Result of [`HostQueue::discard`].
#[derive(Debug, Default)]
pub struct Discarded {
    /// Entries that could still be read, in queue order.
    pub entries: Vec<CandidateUri>,
    /// Every pending entry removed, readable or not.
    pub dropped: u64,
}

#[derive(Debug)]
pub struct HostQueue {
    key: String,
    stem: String,
    state: QueueState,
    in_process: Option<CandidateUri>,
    prerequisites: VecDeque<CandidateUri>,
    high: VecDeque<CandidateUri>,
    bulk: VecDeque<CandidateUri>,
    spill: SpilloverByteQueue,
    memory_cap: usize,
    wake_at: Option<Instant>,
    error_count: u64,
    unavailable: bool,
    last_error: Option<String>,
}

impl HostQueue {
    pub fn new<P: AsRef<Path>>(key: impl Into<String>, stem: impl Into<String>, spill_dir: P, memory_cap: usize) -> Self {
        let stem = stem.into();
        Self {
            key: key.into(),
            spill: SpilloverByteQueue::new(spill_dir, stem.clone()),
            stem,
            state: QueueState::Empty,
            in_process: None,
            prerequisites: VecDeque::new(),
            high: VecDeque::new(),
            bulk: VecDeque::new(),
            memory_cap: memory_cap.max(1),
            wake_at: None,
            error_count: 0,
            unavailable: false,
            last_error: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn in_process(&self) -> Option<&CandidateUri> {
        self.in_process.as_ref()
    }

    pub fn wake_at(&self) -> Option<Instant> {
        self.wake_at
    }

    pub fn memory_count(&self) -> u64 {
        (self.prerequisites.len() + self.high.len() + self.bulk.len()) as u64
    }

    pub fn disk_count(&self) -> u64 {
        self.spill.len()
    }

    pub fn pending(&self) -> u64 {
        self.memory_count() + self.disk_count()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub fn spill_flips(&self) -> u64 {
        self.spill.flips()
    }

    /// Add a URI. Returns true when the queue just became READY.
    pub fn enqueue(&mut self, curi: CandidateUri) -> Result<bool, QueueError> {
        if self.unavailable {
            return Err(QueueError::Unavailable { key: self.key.clone() });
        }

        if curi.is_prerequisite() {
            self.prerequisites.push_back(curi);
        } else if curi.priority == Priority::High {
            self.high.push_back(curi);
        } else if self.spill.is_empty() && self.memory_count() < self.memory_cap as u64 {
            self.bulk.push_back(curi);
        } else {
            let bytes = curi.encode().map_err(|source| QueueError::Codec {
                key: self.key.clone(),
                source,
            })?;
            if let Err(source) = self.spill.append(&bytes) {
                self.poison(&source.to_string());
                return Err(QueueError::Spill { key: self.key.clone(), source });
            }
        }

        if self.state == QueueState::Empty {
            self.state = QueueState::Ready;
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove the highest-priority pending URI.
    pub fn dequeue(&mut self) -> Result<CandidateUri, QueueError> {
        if let Some(curi) = self.prerequisites.pop_front() {
            return Ok(curi);
        }
        if let Some(curi) = self.high.pop_front() {
            return Ok(curi);
        }
        if let Some(curi) = self.bulk.pop_front() {
            return Ok(curi);
        }

        let bytes = match self.spill.pop_front() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(QueueError::Empty { key: self.key.clone() }),
            Err(source) => {
                self.poison(&source.to_string());
                return Err(QueueError::Spill { key: self.key.clone(), source });
            }
        };

        CandidateUri::decode(&bytes).map_err(|source| {
            self.poison(&source.to_string());
            QueueError::Codec { key: self.key.clone(), source }
        })
    }

    /// Open the bracket around a fetch. Only one URI per queue may be in process.
    pub fn note_in_process(&mut self, curi: &CandidateUri) -> Result<(), QueueError> {
        if let Some(current) = &self.in_process {
            return Err(self.violation(format!(
                "{} marked in process while {} still is",
                curi.uri(),
                current.uri()
            )));
        }
        if self.state != QueueState::Ready {
            return Err(self.violation(format!("{} marked in process from state {:?}", curi.uri(), self.state)));
        }

        self.in_process = Some(curi.clone());
        self.state = QueueState::InProcess;
        Ok(())
    }

    /// Close the bracket. A future `wake_at` snoozes the queue until then.
    pub fn note_process_done(&mut self, curi: &CandidateUri, wake_at: Option<Instant>) -> Result<QueueState, QueueError> {
        match &self.in_process {
            Some(current) if current.uri() == curi.uri() => {}
            Some(current) => {
                return Err(self.violation(format!(
                    "{} reported done but {} is in process",
                    curi.uri(),
                    current.uri()
                )));
            }
            None => {
                return Err(self.violation(format!("{} reported done but nothing is in process", curi.uri())));
            }
        }

        self.in_process = None;
        self.state = match wake_at {
            Some(at) if at > Instant::now() => {
                self.wake_at = Some(at);
                QueueState::Snoozed
            }
            _ => {
                self.wake_at = None;
                self.settled_state()
            }
        };
        Ok(self.state)
    }

    /// Leave SNOOZED once the wake time has passed. Returns true when now READY.
    pub fn wake(&mut self, now: Instant) -> bool {
        if self.state != QueueState::Snoozed {
            return false;
        }
        match self.wake_at {
            Some(at) if at > now => false,
            _ => {
                self.wake_at = None;
                self.state = self.settled_state();
                self.state == QueueState::Ready
            }
        }
    }

    /// Mark READY-in-selection queues that turned out to be empty.
    pub fn settle(&mut self) -> QueueState {
        if self.state == QueueState::Ready && self.pending() == 0 {
            self.state = QueueState::Empty;
        }
        self.state
    }

    fn settled_state(&self) -> QueueState {
        if self.pending() > 0 { QueueState::Ready } else { QueueState::Empty }
    }

    /// Attach the spill files.
    pub fn activate(&mut self) -> Result<(), QueueError> {
        if self.disk_count() == 0 {
            return Ok(());
        }
        self.spill.connect().map_err(|source| QueueError::Spill {
            key: self.key.clone(),
            source,
        })
    }

    /// Release file handles; position and contents are kept.
    pub fn deactivate(&mut self) -> Result<(), QueueError> {
        self.spill.disconnect().map_err(|source| QueueError::Spill {
            key: self.key.clone(),
            source,
        })
    }

    /// Drop every pending entry and delete the spill files.
    ///
    /// Never fails: unreadable spill records and undeletable files are logged
    /// and forgotten. The queue accepts new entries afterwards.
    pub fn discard(&mut self) -> Discarded {
        let dropped = self.pending();
        let mut entries: Vec<CandidateUri> = self
            .prerequisites
            .drain(..)
            .chain(self.high.drain(..))
            .chain(self.bulk.drain(..))
            .collect();

        loop {
            match self.spill.pop_front() {
                Ok(Some(bytes)) => match CandidateUri::decode(&bytes) {
                    Ok(curi) => entries.push(curi),
                    Err(e) => tracing::warn!(key = %self.key, error = %e, "undecodable spill record dropped"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "spill unreadable, remaining records dropped");
                    break;
                }
            }
        }
        if let Err(e) = self.spill.discard() {
            tracing::warn!(key = %self.key, error = %e, "could not delete spill files");
        }

        self.wake_at = None;
        self.unavailable = false;
        self.last_error = None;
        self.state = if self.in_process.is_some() { QueueState::InProcess } else { QueueState::Empty };
        Discarded { entries, dropped }
    }

    fn poison(&mut self, reason: &str) {
        self.error_count += 1;
        self.unavailable = true;
        self.last_error = Some(reason.to_string());
        tracing::error!(key = %self.key, error = %reason, "host queue storage failure, queue disabled");
    }

    fn violation(&self, detail: String) -> QueueError {
        tracing::error!(key = %self.key, %detail, "host queue invariant violation");
        QueueError::InvariantViolation { key: self.key.clone(), detail }
    }

    /// Write the memory lanes and copy the spill files into `dest`.
    pub fn checkpoint(&mut self, dest: &Path) -> Result<QueueCheckpoint, QueueError> {
        if let Some(curi) = &self.in_process {
            return Err(self.violation(format!("{} still in process at checkpoint", curi.uri())));
        }

        let spill = self.spill.checkpoint(dest).map_err(|source| QueueError::Spill {
            key: self.key.clone(),
            source,
        })?;
        self.write_lanes(&dest.join(format!("{}.lanes", self.stem)))?;

        let wake_in_ms = self
            .wake_at
            .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64);

        Ok(QueueCheckpoint {
            key: self.key.clone(),
            stem: self.stem.clone(),
            state: self.state,
            wake_in_ms,
            memory_entries: self.memory_count(),
            error_count: self.error_count,
            unavailable: self.unavailable,
            spill,
        })
    }

    /// Rebuild a queue saved by [`HostQueue::checkpoint`].
    pub fn restore<P: AsRef<Path>>(
        spill_dir: P,
        src: &Path,
        saved: &QueueCheckpoint,
        memory_cap: usize,
    ) -> Result<Self, QueueError> {
        let spill = SpilloverByteQueue::restore(spill_dir, src, &saved.spill).map_err(|source| QueueError::Spill {
            key: saved.key.clone(),
            source,
        })?;

        let mut queue = Self {
            key: saved.key.clone(),
            stem: saved.stem.clone(),
            state: QueueState::Empty,
            in_process: None,
            prerequisites: VecDeque::new(),
            high: VecDeque::new(),
            bulk: VecDeque::new(),
            spill,
            memory_cap: memory_cap.max(1),
            wake_at: None,
            error_count: saved.error_count,
            unavailable: saved.unavailable,
            last_error: None,
        };
        queue.read_lanes(&src.join(format!("{}.lanes", saved.stem)))?;

        if queue.memory_count() != saved.memory_entries {
            return Err(queue.violation(format!(
                "lanes file holds {} entries, manifest says {}",
                queue.memory_count(),
                saved.memory_entries
            )));
        }

        queue.wake_at = saved.wake_in_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        queue.state = match saved.state {
            QueueState::Snoozed if queue.wake_at.is_some() => QueueState::Snoozed,
            _ => queue.settled_state(),
        };
        Ok(queue)
    }

    // Layout: u32 version, then per entry: u8 lane, u32 length, rkyv bytes.
    fn write_lanes(&self, path: &Path) -> Result<(), QueueError> {
        let io_err = |source: std::io::Error| QueueError::Checkpoint { key: self.key.clone(), source };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        writer.write_all(&LANES_FILE_VERSION.to_le_bytes()).map_err(io_err)?;

        let lanes = [
            (Lane::Prerequisite, &self.prerequisites),
            (Lane::High, &self.high),
            (Lane::Bulk, &self.bulk),
        ];
        for (lane, entries) in lanes {
            for curi in entries {
                let bytes = curi.encode().map_err(|source| QueueError::Codec {
                    key: self.key.clone(),
                    source,
                })?;
                writer.write_all(&[lane as u8]).map_err(io_err)?;
                writer.write_all(&(bytes.len() as u32).to_le_bytes()).map_err(io_err)?;
                writer.write_all(&bytes).map_err(io_err)?;
            }
        }
        writer.flush().map_err(io_err)
    }

    fn read_lanes(&mut self, path: &Path) -> Result<(), QueueError> {
        let key = self.key.clone();
        let io_err = |source: std::io::Error| QueueError::Checkpoint { key: key.clone(), source };
        let mut reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut version = [0u8; 4];
        reader.read_exact(&mut version).map_err(io_err)?;
        if u32::from_le_bytes(version) != LANES_FILE_VERSION {
            return Err(self.violation(format!("unsupported lanes file version {}", u32::from_le_bytes(version))));
        }

        loop {
            let mut tag = [0u8; 1];
            match reader.read_exact(&mut tag) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(io_err(e)),
            }
            let lane = Lane::from_tag(tag[0]).ok_or_else(|| self.violation(format!("unknown lane tag {}", tag[0])))?;

            let mut len = [0u8; 4];
            reader.read_exact(&mut len).map_err(io_err)?;
            let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
            reader.read_exact(&mut bytes).map_err(io_err)?;

            let curi = CandidateUri::decode(&bytes).map_err(|source| QueueError::Codec {
                key: self.key.clone(),
                source,
            })?;
            match lane {
                Lane::Prerequisite => self.prerequisites.push_back(curi),
                Lane::High => self.high.push_back(curi),
                Lane::Bulk => self.bulk.push_back(curi),
            }
        }
        Ok(())
    }
}
