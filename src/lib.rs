pub mod backoff;
pub mod candidate;
pub mod cli;
pub mod config;
pub mod fingerprint;
pub mod frontier;
pub mod host_queue;
pub mod journal;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod seen;
pub mod spill;
pub mod url_utils;

// Re-export main types for library usage
pub use candidate::{CandidateUri, FetchStatus, Hop, Priority};
pub use config::{FrontierConfig, QueueKeyPolicy, SeenStore};
pub use fingerprint::Fingerprint;
pub use frontier::{CheckpointManifest, Frontier, FrontierError, FrontierStats, QueueReport, ScheduleOutcome};
pub use host_queue::{Discarded, HostQueue, QueueError, QueueState};
pub use journal::{JournalOp, RecoveryJournal, ReplayReport, replay};
pub use pool::{CrawlDriver, DriverConfig, FetchOutcome, Fetcher};
pub use seen::{FingerprintSet, MemFingerprintSet, RedbFingerprintSet};
pub use spill::{SpillError, SpilloverByteQueue};
