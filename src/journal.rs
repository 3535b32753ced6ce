//! Recovery journal: a gzip text log of every frontier transition.
//!
//! One record per line, `<op> <uri>[ <path> <via>]`:
//!
//! | op   | meaning                          |
//! |------|----------------------------------|
//! | `F+` | scheduled (always has path, via) |
//! | `Fe` | emitted to a worker              |
//! | `Fr` | rescheduled                      |
//! | `Fs` | fetched successfully             |
//! | `Ff` | failed permanently               |
//!
//! Lines are produced under the affected queue's lock and handed to a
//! dedicated writer thread over a channel, so file order is operation order.
//! Replay reads the log twice: `Fs` lines first mark URIs seen, then every
//! `F+` URI not already seen is scheduled again.

use crate::candidate::CandidateUri;
use crate::frontier::{Frontier, FrontierError, ScheduleOutcome};
use crate::metrics::SharedMetrics;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const CHANNEL_CAPACITY: usize = 100_000;
const MAX_BATCH_SIZE: usize = 5000;
const EMPTY_FIELD: &str = "-";

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal is closed")]
    Closed,

    #[error("Journal flush failed: {0}")]
    Flush(String),

    #[error("Journal writer thread panicked")]
    WriterPanicked,

    #[error("Malformed journal line: {0}")]
    Malformed(String),

    #[error("Replay failed: {0}")]
    Replay(#[from] Box<FrontierError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum JournalOp {
    Add,
    Emit,
    Reschedule,
    Success,
    Failure,
}

impl JournalOp {
    pub fn code(self) -> &'static str {
        match self {
            JournalOp::Add => "F+",
            JournalOp::Emit => "Fe",
            JournalOp::Reschedule => "Fr",
            JournalOp::Success => "Fs",
            JournalOp::Failure => "Ff",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "F+" => Some(JournalOp::Add),
            "Fe" => Some(JournalOp::Emit),
            "Fr" => Some(JournalOp::Reschedule),
            "Fs" => Some(JournalOp::Success),
            "Ff" => Some(JournalOp::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for JournalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub op: JournalOp,
    pub uri: String,
    pub path: Option<String>,
    pub via: Option<String>,
}

impl JournalRecord {
    pub fn from_candidate(op: JournalOp, curi: &CandidateUri) -> Self {
        let (path, via) = if op == JournalOp::Add {
            (Some(curi.path().to_string()), curi.via().map(str::to_string))
        } else {
            (None, None)
        };
        Self {
            op,
            uri: curi.uri().to_string(),
            path,
            via,
        }
    }

    pub fn to_line(&self) -> String {
        if self.op == JournalOp::Add {
            let path = match self.path.as_deref() {
                Some(p) if !p.is_empty() => p,
                _ => EMPTY_FIELD,
            };
            let via = self.via.as_deref().unwrap_or(EMPTY_FIELD);
            format!("{} {} {} {}", self.op, self.uri, path, via)
        } else {
            format!("{} {}", self.op, self.uri)
        }
    }

    pub fn parse(line: &str) -> Result<Self, JournalError> {
        let mut fields = line.split_ascii_whitespace();
        let op = fields
            .next()
            .and_then(JournalOp::from_code)
            .ok_or_else(|| JournalError::Malformed(line.to_string()))?;
        let uri = fields.next().ok_or_else(|| JournalError::Malformed(line.to_string()))?;

        let path = fields.next().map(|p| if p == EMPTY_FIELD { String::new() } else { p.to_string() });
        let via = fields.next().filter(|v| *v != EMPTY_FIELD).map(str::to_string);

        if op == JournalOp::Add && path.is_none() {
            return Err(JournalError::Malformed(line.to_string()));
        }

        Ok(Self {
            op,
            uri: uri.to_string(),
            path,
            via,
        })
    }

    /// Rebuild the scheduled URI from an `F+` record.
    pub fn to_candidate(&self) -> CandidateUri {
        CandidateUri::from_parts(self.uri.clone(), self.path.clone().unwrap_or_default(), self.via.clone())
    }
}

enum WriterMessage {
    Line(String),
    Flush(Sender<Result<(), String>>),
    Close,
}

pub struct RecoveryJournal {
    path: PathBuf,
    previous: Option<PathBuf>,
    tx: Sender<WriterMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    metrics: SharedMetrics,
}

impl RecoveryJournal {
    /// Start a fresh journal at `path`. An existing non-empty journal is moved
    /// aside first; see [`RecoveryJournal::previous_journal`].
    pub fn open<P: AsRef<Path>>(path: P, flush_interval: Duration, metrics: SharedMetrics) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let previous = match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                let rotated = rotated_name(&path);
                fs::rename(&path, &rotated)?;
                tracing::info!(from = %path.display(), to = %rotated.display(), "rotated previous journal");
                Some(rotated)
            }
            _ => None,
        };

        let file = File::create(&path)?;
        let (tx, rx) = flume::bounded::<WriterMessage>(CHANNEL_CAPACITY);
        let writer_metrics = metrics.clone();
        let handle = thread::Builder::new()
            .name("journal-writer".to_string())
            .spawn(move || writer_loop(file, rx, flush_interval, writer_metrics))?;

        tracing::info!(path = %path.display(), "recovery journal opened");

        Ok(Self {
            path,
            previous,
            tx,
            handle: Mutex::new(Some(handle)),
            metrics,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The journal that was rotated away when this one was opened.
    pub fn previous_journal(&self) -> Option<&Path> {
        self.previous.as_deref()
    }

    pub fn record(&self, op: JournalOp, curi: &CandidateUri) -> Result<(), JournalError> {
        self.record_line(JournalRecord::from_candidate(op, curi).to_line())
    }

    fn record_line(&self, line: String) -> Result<(), JournalError> {
        self.tx.send(WriterMessage::Line(line)).map_err(|_| JournalError::Closed)?;
        self.metrics.journal_records.inc();
        Ok(())
    }

    /// Block until everything recorded so far has reached the file.
    pub fn flush(&self) -> Result<(), JournalError> {
        let (ack_tx, ack_rx) = flume::bounded(1);
        self.tx.send(WriterMessage::Flush(ack_tx)).map_err(|_| JournalError::Closed)?;
        ack_rx
            .recv()
            .map_err(|_| JournalError::Closed)?
            .map_err(JournalError::Flush)
    }

    /// Finish the gzip stream and stop the writer. Later records fail with `Closed`.
    pub fn close(&self) -> Result<(), JournalError> {
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        let _ = self.tx.send(WriterMessage::Close);
        handle.join().map_err(|_| JournalError::WriterPanicked)?;
        tracing::info!(path = %self.path.display(), "recovery journal closed");
        Ok(())
    }
}

impl Drop for RecoveryJournal {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to close recovery journal");
        }
    }
}

fn rotated_name(path: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "journal".to_string());
    path.with_file_name(format!("{}.{}", name, millis))
}

fn writer_loop(file: File, rx: Receiver<WriterMessage>, flush_interval: Duration, metrics: SharedMetrics) {
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut dirty = false;
    let mut last_flush = Instant::now();

    'outer: loop {
        let batch = match drain_batch(&rx, flush_interval) {
            Ok(batch) => batch,
            Err(RecvTimeoutError::Timeout) => Vec::new(),
            Err(RecvTimeoutError::Disconnected) => break,
        };

        for message in batch {
            match message {
                WriterMessage::Line(line) => {
                    if let Err(e) = encoder.write_all(line.as_bytes()).and_then(|_| encoder.write_all(b"\n")) {
                        metrics.journal_errors.inc();
                        tracing::error!(error = %e, "journal write failed");
                    } else {
                        dirty = true;
                    }
                }
                WriterMessage::Flush(ack) => {
                    let result = timed_flush(&mut encoder, &metrics).map_err(|e| e.to_string());
                    dirty = false;
                    last_flush = Instant::now();
                    let _ = ack.send(result);
                }
                WriterMessage::Close => break 'outer,
            }
        }

        if dirty && last_flush.elapsed() >= flush_interval {
            if let Err(e) = timed_flush(&mut encoder, &metrics) {
                metrics.journal_errors.inc();
                tracing::error!(error = %e, "periodic journal flush failed");
            }
            dirty = false;
            last_flush = Instant::now();
        }
    }

    match encoder.finish().and_then(|mut inner| inner.flush()) {
        Ok(()) => tracing::debug!("journal writer exiting"),
        Err(e) => {
            metrics.journal_errors.inc();
            tracing::error!(error = %e, "failed to finish journal gzip stream");
        }
    }
}

/// Wait for one message, then take whatever else is already queued.
fn drain_batch(rx: &Receiver<WriterMessage>, timeout: Duration) -> Result<Vec<WriterMessage>, RecvTimeoutError> {
    let first = rx.recv_timeout(timeout)?;
    let mut batch = Vec::with_capacity(64);
    batch.push(first);
    while batch.len() < MAX_BATCH_SIZE {
        match rx.try_recv() {
            Ok(message) => batch.push(message),
            Err(_) => break,
        }
    }
    Ok(batch)
}

fn timed_flush(encoder: &mut GzEncoder<BufWriter<File>>, metrics: &SharedMetrics) -> std::io::Result<()> {
    let start = Instant::now();
    encoder.flush()?;
    metrics.record_journal_flush(start.elapsed());
    Ok(())
}

#[derive(Debug, Default)]
struct ReadOutcome {
    malformed: u64,
    truncated: bool,
}

/// Read records until the end of the log. A truncated gzip stream or a final
/// line without its newline ends the log; it is not an error.
fn for_each_record<F>(path: &Path, warn_malformed: bool, mut visit: F) -> Result<ReadOutcome, JournalError>
where
    F: FnMut(JournalRecord) -> Result<(), JournalError>,
{
    let mut reader = BufReader::new(GzDecoder::new(File::open(path)?));
    let mut buf = Vec::with_capacity(256);
    let mut outcome = ReadOutcome::default();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) if buf.last() != Some(&b'\n') => {
                outcome.truncated = true;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, path = %path.display(), "journal ends early");
                outcome.truncated = true;
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match JournalRecord::parse(line) {
            Ok(record) => visit(record)?,
            Err(_) => {
                outcome.malformed += 1;
                if warn_malformed {
                    tracing::warn!(line = %line, "skipping malformed journal line");
                }
            }
        }
    }
    Ok(outcome)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplayReport {
    pub marked_seen: u64,
    pub scheduled: u64,
    pub already_seen: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub truncated: bool,
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "marked seen: {}, scheduled: {}, already seen: {}, rejected: {}, malformed lines: {}{}",
            self.marked_seen,
            self.scheduled,
            self.already_seen,
            self.rejected,
            self.malformed,
            if self.truncated { ", log truncated" } else { "" }
        )
    }
}

/// Rebuild frontier state from a journal.
pub fn replay(path: &Path, frontier: &Frontier) -> Result<ReplayReport, JournalError> {
    tracing::info!(path = %path.display(), "replaying recovery journal");
    let mut report = ReplayReport::default();

    // Pass 1 only marks; enqueueing here would fetch finished URIs again.
    for_each_record(path, false, |record| {
        if record.op == JournalOp::Success && frontier.mark_seen(&record.uri).map_err(Box::new)? {
            report.marked_seen += 1;
        }
        Ok(())
    })?;

    let outcome = for_each_record(path, true, |record| {
        if record.op != JournalOp::Add {
            return Ok(());
        }
        match frontier.schedule(record.to_candidate()).map_err(Box::new)? {
            ScheduleOutcome::Scheduled => report.scheduled += 1,
            ScheduleOutcome::Duplicate => report.already_seen += 1,
            ScheduleOutcome::Rejected | ScheduleOutcome::Invalid => report.rejected += 1,
        }
        Ok(())
    })?;
    report.malformed = outcome.malformed;
    report.truncated = outcome.truncated;

    tracing::info!(%report, "journal replay complete");
    Ok(report)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct JournalStats {
    pub records: BTreeMap<JournalOp, u64>,
    pub malformed: u64,
    pub truncated: bool,
}

/// Count records per op without touching any frontier.
pub fn journal_stats(path: &Path) -> Result<JournalStats, JournalError> {
    let mut records = BTreeMap::new();
    let outcome = for_each_record(path, true, |record| {
        *records.entry(record.op).or_insert(0) += 1;
        Ok(())
    })?;
    Ok(JournalStats {
        records,
        malformed: outcome.malformed,
        truncated: outcome.truncated,
    })
}
