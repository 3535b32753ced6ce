//! The crawl frontier: per-key queues, dedup, politeness and the journal.
//!
//! Lock order is always queue mutex first, then the ready ring or snooze heap.
//! Selection pops a key from the ring under the short global lock and does the
//! dequeue (which may read a spill file) under that queue's own lock only.

use crate::backoff::ExponentialBackoff;
use crate::candidate::{CandidateUri, Priority};
use crate::config::{ConfigError, FrontierConfig};
use crate::host_queue::{HostQueue, QueueCheckpoint, QueueError, QueueState};
use crate::journal::{JournalError, JournalOp, RecoveryJournal};
use crate::metrics::{FrontierMetrics, SharedMetrics};
use crate::seen::{FingerprintSet, SeenError, open_seen_store};
use crate::url_utils::{canonicalize, queue_file_stem, queue_key};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const CHECKPOINT_VERSION: u32 = 1;
pub const CHECKPOINT_MANIFEST: &str = "frontier.json";

#[derive(Error, Debug)]
pub enum FrontierError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Seen store error: {0}")]
    Seen(#[from] SeenError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Cannot checkpoint: {uri} is still in process on queue {key}")]
    InProcessAtCheckpoint { key: String, uri: String },

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedCheckpoint { found: u32, expected: u32 },

    #[error("No queue for key {0}")]
    UnknownQueue(String),

    #[error("URI has no usable host: {0}")]
    InvalidUri(String),

    #[error("Frontier is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// New URI, now pending.
    Scheduled,
    /// Already seen; dropped.
    Duplicate,
    /// Its queue could not take it (storage failure). Not marked seen.
    Rejected,
    /// Could not be canonicalized or keyed.
    Invalid,
}

/// Versioned description of a checkpoint directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub version: u32,
    pub created_at_ms: u64,
    pub seen_count: u64,
    pub pending: u64,
    pub queues: Vec<QueueCheckpoint>,
}

impl CheckpointManifest {
    pub fn load(dir: &Path) -> Result<Self, FrontierError> {
        let reader = BufReader::new(File::open(dir.join(CHECKPOINT_MANIFEST))?);
        let manifest: CheckpointManifest = serde_json::from_reader(reader)?;
        if manifest.version != CHECKPOINT_VERSION {
            return Err(FrontierError::UnsupportedCheckpoint {
                found: manifest.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueReport {
    pub key: String,
    pub state: QueueState,
    pub pending: u64,
    pub in_memory: u64,
    pub on_disk: u64,
    pub spill_flips: u64,
    pub in_process: Option<String>,
    pub error_count: u64,
    pub unavailable: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrontierStats {
    pub queues: usize,
    pub ready: usize,
    pub snoozed: usize,
    pub in_process: u64,
    pub pending: u64,
    pub seen: u64,
    pub unavailable_queues: usize,
    pub scheduled: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub emitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rescheduled: u64,
    pub spill_writes: u64,
    pub spill_reads: u64,
    pub spill_flips: u64,
    pub journal_records: u64,
    pub journal_errors: u64,
    pub journal_flush_mean_ms: f64,
    pub journal_flush_p99_ms: u64,
}

impl fmt::Display for FrontierStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frontier: {} queues ({} ready, {} snoozed, {} unavailable), {} pending, {} in process, {} seen | \
             scheduled {}, duplicates {}, rejected {}, emitted {}, succeeded {}, failed {}, rescheduled {} | \
             spill writes {}, spill reads {}, spill flips {}, journal records {} ({} errors, flush mean {:.1}ms p99 {}ms)",
            self.queues,
            self.ready,
            self.snoozed,
            self.unavailable_queues,
            self.pending,
            self.in_process,
            self.seen,
            self.scheduled,
            self.duplicates,
            self.rejected,
            self.emitted,
            self.succeeded,
            self.failed,
            self.rescheduled,
            self.spill_writes,
            self.spill_reads,
            self.spill_flips,
            self.journal_records,
            self.journal_errors,
            self.journal_flush_mean_ms,
            self.journal_flush_p99_ms
        )
    }
}

type SharedQueue = Arc<Mutex<HostQueue>>;

pub struct Frontier {
    config: FrontierConfig,
    queues: DashMap<String, SharedQueue>,
    ready: Mutex<VecDeque<String>>,
    snoozed: Mutex<BinaryHeap<Reverse<(Instant, u64, String)>>>,
    sequence: AtomicU64,
    pending: AtomicU64,
    in_process: AtomicU64,
    seen: Arc<dyn FingerprintSet>,
    journal: Option<RecoveryJournal>,
    backoff: ExponentialBackoff,
    metrics: SharedMetrics,
    closed: AtomicBool,
}

impl Frontier {
    /// Open an empty frontier rooted at `config.state_dir`.
    ///
    /// Spill files and the on-disk seen store left by an earlier run are
    /// removed; earlier state comes back through [`crate::journal::replay`] or
    /// [`Frontier::restore`]. An existing journal is rotated, not overwritten.
    pub fn open(config: FrontierConfig) -> Result<Self, FrontierError> {
        config.validate()?;
        fs::create_dir_all(&config.state_dir)?;
        let queues_dir = config.queues_dir();
        if queues_dir.exists() {
            fs::remove_dir_all(&queues_dir)?;
        }
        fs::create_dir_all(&queues_dir)?;
        let seen_db = config.seen_db_path();
        if seen_db.exists() {
            fs::remove_file(&seen_db)?;
        }

        let metrics: SharedMetrics = Arc::new(FrontierMetrics::new());
        let seen = open_seen_store(&config)?;
        let journal = if config.journal.enabled {
            Some(RecoveryJournal::open(
                config.journal_path(),
                Duration::from_millis(config.journal.flush_interval_ms),
                metrics.clone(),
            )?)
        } else {
            None
        };

        tracing::info!(
            state_dir = %config.state_dir.display(),
            key_policy = ?config.key_policy,
            seen_store = ?config.seen_store,
            journal = config.journal.enabled,
            "frontier opened"
        );

        Ok(Self {
            backoff: ExponentialBackoff::from_config(&config.retry),
            config,
            queues: DashMap::new(),
            ready: Mutex::new(VecDeque::new()),
            snoozed: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            in_process: AtomicU64::new(0),
            seen,
            journal,
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &FrontierConfig {
        &self.config
    }

    pub fn journal(&self) -> Option<&RecoveryJournal> {
        self.journal.as_ref()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn in_process(&self) -> u64 {
        self.in_process.load(Ordering::SeqCst)
    }

    /// Nothing pending and nothing out with a worker.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0 && self.in_process() == 0
    }

    /// No queue is ready or snoozed and nothing is in process, so `next` will
    /// keep returning `None` until something new is scheduled. Pending URIs
    /// may remain in unavailable queues waiting for [`Frontier::discard_queue`].
    pub fn is_stalled(&self) -> bool {
        self.in_process() == 0 && self.ready.lock().is_empty() && self.snoozed.lock().is_empty()
    }

    fn ensure_open(&self) -> Result<(), FrontierError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FrontierError::Closed);
        }
        Ok(())
    }

    fn journal_op(&self, op: JournalOp, curi: &CandidateUri) -> Result<(), FrontierError> {
        if let Some(journal) = &self.journal {
            journal.record(op, curi)?;
        }
        Ok(())
    }

    fn key_of(&self, curi: &CandidateUri) -> Result<String, FrontierError> {
        queue_key(curi.uri(), self.config.key_policy).ok_or_else(|| FrontierError::InvalidUri(curi.uri().to_string()))
    }

    fn queue(&self, key: &str) -> Option<SharedQueue> {
        self.queues.get(key).map(|q| q.value().clone())
    }

    fn queue_or_create(&self, key: &str) -> SharedQueue {
        self.queues
            .entry(key.to_string())
            .or_insert_with(|| {
                let stem = queue_file_stem(key);
                tracing::debug!(key, stem = %stem, "creating host queue");
                Arc::new(Mutex::new(HostQueue::new(
                    key,
                    stem,
                    self.config.queues_dir(),
                    self.config.memory_queue_cap,
                )))
            })
            .value()
            .clone()
    }

    fn snooze(&self, key: String, until: Instant) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.snoozed.lock().push(Reverse((until, seq, key)));
    }

    fn park(&self, key: String, state: QueueState, wake_at: Option<Instant>) {
        match (state, wake_at) {
            (QueueState::Ready, _) => self.ready.lock().push_back(key),
            (QueueState::Snoozed, Some(at)) => self.snooze(key, at),
            _ => {}
        }
    }

    /// Offer a discovered URI. Only a URI never seen before becomes pending.
    pub fn schedule(&self, mut curi: CandidateUri) -> Result<ScheduleOutcome, FrontierError> {
        self.ensure_open()?;
        curi.normalize_serialization();

        let Some(canonical) = canonicalize(curi.uri(), &self.config.canonicalization) else {
            tracing::debug!(uri = curi.uri(), "dropping uncanonicalizable URI");
            return Ok(ScheduleOutcome::Invalid);
        };
        let Some(key) = queue_key(curi.uri(), self.config.key_policy) else {
            tracing::debug!(uri = curi.uri(), "dropping URI without a queue key");
            return Ok(ScheduleOutcome::Invalid);
        };

        if !self.seen.add(&canonical)? {
            self.metrics.duplicates.inc();
            return Ok(ScheduleOutcome::Duplicate);
        }

        curi.reset_outcome();
        let queue = self.queue_or_create(&key);
        let mut q = queue.lock();
        let on_disk = q.disk_count();
        match q.enqueue(curi.clone()) {
            Ok(became_ready) => {
                self.journal_op(JournalOp::Add, &curi)?;
                self.pending.fetch_add(1, Ordering::SeqCst);
                self.metrics.scheduled.inc();
                if q.disk_count() > on_disk {
                    self.metrics.spill_writes.inc();
                }
                if became_ready {
                    self.ready.lock().push_back(key);
                }
                tracing::debug!(uri = curi.uri(), priority = curi.priority.as_str(), "scheduled");
                Ok(ScheduleOutcome::Scheduled)
            }
            Err(e) => {
                drop(q);
                self.seen.remove(&canonical)?;
                self.metrics.rejected.inc();
                tracing::warn!(uri = curi.uri(), error = %e, "queue rejected URI");
                Ok(ScheduleOutcome::Rejected)
            }
        }
    }

    /// Mark a URI seen without scheduling it.
    pub fn mark_seen(&self, uri: &str) -> Result<bool, FrontierError> {
        self.ensure_open()?;
        let mut curi = CandidateUri::seed(uri);
        curi.normalize_serialization();
        let Some(canonical) = canonicalize(curi.uri(), &self.config.canonicalization) else {
            return Ok(false);
        };
        let added = self.seen.add(&canonical)?;
        if added {
            self.journal_op(JournalOp::Success, &curi)?;
        }
        Ok(added)
    }

    pub fn is_seen(&self, uri: &str) -> Result<bool, FrontierError> {
        match canonicalize(uri, &self.config.canonicalization) {
            Some(canonical) => Ok(self.seen.contains(&canonical)?),
            None => Ok(false),
        }
    }

    /// Hand out the next URI, or `None` when no queue is ready right now.
    pub fn next(&self) -> Result<Option<CandidateUri>, FrontierError> {
        self.ensure_open()?;
        self.wake_snoozed(Instant::now());

        loop {
            let Some(key) = self.ready.lock().pop_front() else {
                return Ok(None);
            };
            let Some(queue) = self.queue(&key) else {
                continue;
            };

            let mut q = queue.lock();
            if q.state() != QueueState::Ready {
                continue;
            }

            let from_disk = q.memory_count() == 0;
            let before = q.pending();
            match q.dequeue() {
                Ok(curi) => {
                    q.note_in_process(&curi)?;
                    self.journal_op(JournalOp::Emit, &curi)?;
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    self.in_process.fetch_add(1, Ordering::SeqCst);
                    self.metrics.emitted.inc();
                    if from_disk {
                        self.metrics.spill_reads.inc();
                    }
                    tracing::debug!(uri = curi.uri(), key = %key, "emitted");
                    return Ok(Some(curi));
                }
                Err(QueueError::Empty { .. }) => {
                    q.settle();
                }
                Err(e) => {
                    // The queue is poisoned and leaves the rotation. A record it
                    // consumed before failing is gone for good.
                    let lost = before - q.pending();
                    self.pending.fetch_sub(lost, Ordering::SeqCst);
                    tracing::error!(key = %key, error = %e, lost, stranded = q.pending(), "queue failed during selection");
                }
            }
        }
    }

    fn politeness_delay(&self, curi: &CandidateUri) -> Duration {
        if curi.uri().starts_with("dns:") {
            return Duration::ZERO;
        }
        let politeness = &self.config.politeness;
        let fetch_ms = curi.fetch_duration_ms.unwrap_or(0) as f64;
        let delay_ms = ((fetch_ms * politeness.delay_factor) as u64).clamp(politeness.min_delay_ms, politeness.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    fn close_bracket(&self, curi: &CandidateUri, delay: Duration, op: JournalOp) -> Result<(), FrontierError> {
        let key = self.key_of(curi)?;
        let queue = self.queue(&key).ok_or_else(|| FrontierError::UnknownQueue(key.clone()))?;

        let mut q = queue.lock();
        let wake_at = (!delay.is_zero()).then(|| Instant::now() + delay);
        let state = q.note_process_done(curi, wake_at)?;
        self.journal_op(op, curi)?;
        self.in_process.fetch_sub(1, Ordering::SeqCst);
        self.park(key, state, q.wake_at());
        Ok(())
    }

    /// The fetch of `curi` succeeded.
    pub fn succeeded(&self, curi: &CandidateUri) -> Result<(), FrontierError> {
        self.close_bracket(curi, self.politeness_delay(curi), JournalOp::Success)?;
        self.metrics.succeeded.inc();
        tracing::debug!(uri = curi.uri(), "succeeded");
        Ok(())
    }

    /// The fetch of `curi` failed for good. A failed prerequisite is forgotten
    /// so that a later discovery can schedule it again.
    pub fn failed(&self, curi: &CandidateUri) -> Result<(), FrontierError> {
        self.close_bracket(curi, self.politeness_delay(curi), JournalOp::Failure)?;
        if curi.is_prerequisite()
            && let Some(canonical) = canonicalize(curi.uri(), &self.config.canonicalization)
        {
            self.seen.remove(&canonical)?;
        }
        self.metrics.failed.inc();
        tracing::debug!(uri = curi.uri(), "failed");
        Ok(())
    }

    /// Put `curi` back in line after a retryable failure. The queue snoozes for
    /// the retry backoff. Returns false when retries are exhausted, in which
    /// case the URI is recorded as failed instead.
    pub fn rescheduled(&self, mut curi: CandidateUri, priority: Priority) -> Result<bool, FrontierError> {
        if curi.fetch_attempts > self.config.retry.max_retries {
            tracing::info!(uri = curi.uri(), attempts = curi.fetch_attempts, "retries exhausted");
            self.failed(&curi)?;
            return Ok(false);
        }

        let key = self.key_of(&curi)?;
        let queue = self.queue(&key).ok_or_else(|| FrontierError::UnknownQueue(key.clone()))?;
        let delay = self
            .backoff
            .delay(curi.fetch_attempts.saturating_sub(1))
            .max(self.politeness_delay(&curi));

        let mut q = queue.lock();
        let wake_at = (!delay.is_zero()).then(|| Instant::now() + delay);
        let state = q.note_process_done(&curi, wake_at)?;
        self.journal_op(JournalOp::Reschedule, &curi)?;
        self.in_process.fetch_sub(1, Ordering::SeqCst);

        curi.reset_outcome();
        curi.priority = priority;
        let requeued = match q.enqueue(curi.clone()) {
            Ok(_) => {
                self.pending.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::error!(uri = curi.uri(), error = %e, "could not requeue URI");
                false
            }
        };
        if requeued && state == QueueState::Empty {
            // enqueue turned EMPTY into READY
            self.park(key, q.state(), q.wake_at());
        } else if state != QueueState::Empty {
            self.park(key, state, q.wake_at());
        }
        drop(q);

        self.metrics.rescheduled.inc();
        tracing::debug!(uri = curi.uri(), delay_ms = delay.as_millis() as u64, "rescheduled");
        Ok(requeued)
    }

    /// Promote every snoozed queue whose wake time has passed. Returns how many became ready.
    pub fn wake_snoozed(&self, now: Instant) -> usize {
        let mut woken = 0;
        loop {
            let due = {
                let mut heap = self.snoozed.lock();
                match heap.peek() {
                    Some(Reverse((at, _, _))) if *at <= now => heap.pop().map(|Reverse((_, _, key))| key),
                    _ => None,
                }
            };
            let Some(key) = due else {
                break;
            };
            if let Some(queue) = self.queue(&key) {
                let mut q = queue.lock();
                if q.wake(now) {
                    self.ready.lock().push_back(key);
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Earliest time a snoozed queue is due.
    pub fn next_wake_time(&self) -> Option<Instant> {
        self.snoozed.lock().peek().map(|Reverse((at, _, _))| *at)
    }

    /// Drop every pending URI of one queue. Returns how many were dropped.
    ///
    /// Works on a queue whose backing files are gone: whatever can still be
    /// read is journaled as done so replay leaves it out, the rest is lost.
    /// The queue accepts new URIs afterwards.
    pub fn discard_queue(&self, key: &str) -> Result<u64, FrontierError> {
        self.ensure_open()?;
        let queue = self.queue(key).ok_or_else(|| FrontierError::UnknownQueue(key.to_string()))?;
        let mut q = queue.lock();
        let discarded = q.discard();
        self.pending.fetch_sub(discarded.dropped, Ordering::SeqCst);
        if q.in_process().is_none() {
            self.queues.remove(key);
        }
        for curi in &discarded.entries {
            self.journal_op(JournalOp::Success, curi)?;
        }
        let unreadable = discarded.dropped - discarded.entries.len() as u64;
        tracing::warn!(key, dropped = discarded.dropped, unreadable, "queue discarded");
        Ok(discarded.dropped)
    }

    fn all_queues(&self) -> Vec<SharedQueue> {
        let mut entries: Vec<(String, SharedQueue)> =
            self.queues.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, q)| q).collect()
    }

    pub fn queue_reports(&self) -> Vec<QueueReport> {
        self.all_queues()
            .iter()
            .map(|queue| {
                let q = queue.lock();
                QueueReport {
                    key: q.key().to_string(),
                    state: q.state(),
                    pending: q.pending(),
                    in_memory: q.memory_count(),
                    on_disk: q.disk_count(),
                    spill_flips: q.spill_flips(),
                    in_process: q.in_process().map(|c| c.uri().to_string()),
                    error_count: q.error_count(),
                    unavailable: q.is_unavailable(),
                    last_error: q.last_error().map(str::to_string),
                }
            })
            .collect()
    }

    pub fn stats(&self) -> FrontierStats {
        let reports = self.queue_reports();
        let flush = self.metrics.journal_flush_snapshot();
        FrontierStats {
            queues: reports.len(),
            ready: reports.iter().filter(|r| r.state == QueueState::Ready).count(),
            snoozed: reports.iter().filter(|r| r.state == QueueState::Snoozed).count(),
            in_process: self.in_process(),
            pending: self.pending(),
            seen: self.seen.len(),
            unavailable_queues: reports.iter().filter(|r| r.unavailable).count(),
            scheduled: self.metrics.scheduled.get(),
            duplicates: self.metrics.duplicates.get(),
            rejected: self.metrics.rejected.get(),
            emitted: self.metrics.emitted.get(),
            succeeded: self.metrics.succeeded.get(),
            failed: self.metrics.failed.get(),
            rescheduled: self.metrics.rescheduled.get(),
            spill_writes: self.metrics.spill_writes.get(),
            spill_reads: self.metrics.spill_reads.get(),
            spill_flips: reports.iter().map(|r| r.spill_flips).sum(),
            journal_records: self.metrics.journal_records.get(),
            journal_errors: self.metrics.journal_errors.get(),
            journal_flush_mean_ms: flush.mean_ms(),
            journal_flush_p99_ms: flush.percentile_ms(99.0),
        }
    }

    /// Snapshot the whole frontier into `dir`. Every URI handed out must have
    /// been reported back first.
    pub fn checkpoint(&self, dir: &Path) -> Result<CheckpointManifest, FrontierError> {
        self.ensure_open()?;
        fs::create_dir_all(dir)?;

        let queues = self.all_queues();
        let mut guards: Vec<_> = queues.iter().map(|q| q.lock()).collect();
        if let Some(busy) = guards.iter().find(|q| q.in_process().is_some()) {
            let uri = busy.in_process().map(|c| c.uri().to_string()).unwrap_or_default();
            tracing::error!(key = busy.key(), uri = %uri, "checkpoint attempted with URI in process");
            return Err(FrontierError::InProcessAtCheckpoint {
                key: busy.key().to_string(),
                uri,
            });
        }

        let mut saved = Vec::with_capacity(guards.len());
        for q in guards.iter_mut() {
            saved.push(q.checkpoint(dir)?);
        }
        self.seen.checkpoint(dir)?;
        if let Some(journal) = &self.journal {
            journal.flush()?;
        }

        let manifest = CheckpointManifest {
            version: CHECKPOINT_VERSION,
            created_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            seen_count: self.seen.len(),
            pending: saved.iter().map(|q| q.memory_entries + q.spill.head_records + q.spill.tail_records).sum(),
            queues: saved,
        };
        drop(guards);

        let writer = BufWriter::new(File::create(dir.join(CHECKPOINT_MANIFEST))?);
        serde_json::to_writer_pretty(writer, &manifest)?;
        tracing::info!(
            dir = %dir.display(),
            queues = manifest.queues.len(),
            pending = manifest.pending,
            seen = manifest.seen_count,
            "checkpoint written"
        );
        Ok(manifest)
    }

    /// Build a frontier from a checkpoint directory.
    pub fn restore(config: FrontierConfig, dir: &Path) -> Result<Self, FrontierError> {
        let manifest = CheckpointManifest::load(dir)?;
        let frontier = Self::open(config)?;
        frontier.seen.restore(dir)?;

        for saved in &manifest.queues {
            let q = HostQueue::restore(
                frontier.config.queues_dir(),
                dir,
                saved,
                frontier.config.memory_queue_cap,
            )?;
            frontier.pending.fetch_add(q.pending(), Ordering::SeqCst);
            frontier.park(saved.key.clone(), q.state(), q.wake_at());
            frontier.queues.insert(saved.key.clone(), Arc::new(Mutex::new(q)));
        }

        tracing::info!(
            dir = %dir.display(),
            queues = manifest.queues.len(),
            pending = frontier.pending(),
            seen = frontier.seen.len(),
            "frontier restored from checkpoint"
        );
        Ok(frontier)
    }

    /// Flush the seen store, finish the journal and release spill file handles.
    pub fn close(&self) -> Result<(), FrontierError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for queue in self.all_queues() {
            if let Err(e) = queue.lock().deactivate() {
                tracing::error!(error = %e, "failed to release queue files");
            }
        }
        self.seen.flush()?;
        if let Some(journal) = &self.journal {
            journal.close()?;
        }
        tracing::info!(stats = %self.stats(), "frontier closed");
        Ok(())
    }
}
