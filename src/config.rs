// Frontier configuration: defaults live in `Defaults`, runtime values in `FrontierConfig`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub struct Defaults;

impl Defaults {
    // Queues
    pub const MEMORY_QUEUE_CAP: usize = 200;
    pub const SEEN_FLUSH_BATCH: usize = 10_000;

    // Politeness
    pub const DELAY_FACTOR: f64 = 5.0;
    pub const MIN_DELAY_MS: u64 = 3_000;
    pub const MAX_DELAY_MS: u64 = 30_000;

    // Retries
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 1_000;
    pub const RETRY_MAX_DELAY_MS: u64 = 60_000;

    // Journal
    pub const JOURNAL_FLUSH_INTERVAL_MS: u64 = 500;
    pub const JOURNAL_FILE: &'static str = "frontier.recover.gz";
}

/// How a URI is mapped to the queue that serializes its fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueKeyPolicy {
    /// Bare host name.
    Host,
    /// Host plus port when the port is not the scheme default.
    #[default]
    Authority,
    /// eTLD+1, so every subdomain of a site shares one queue.
    RegistrableDomain,
}

/// Backing store for the already-seen set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeenStore {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    /// Snooze = last fetch duration * factor, clamped to [min, max].
    pub delay_factor: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            delay_factor: Defaults::DELAY_FACTOR,
            min_delay_ms: Defaults::MIN_DELAY_MS,
            max_delay_ms: Defaults::MAX_DELAY_MS,
        }
    }
}

impl PolitenessConfig {
    /// No delay between fetches. Handy for tests and replay tooling.
    pub fn none() -> Self {
        Self {
            delay_factor: 0.0,
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Defaults::MAX_RETRIES,
            base_delay_ms: Defaults::RETRY_BASE_DELAY_MS,
            max_delay_ms: Defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub flush_interval_ms: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_interval_ms: Defaults::JOURNAL_FLUSH_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalizationConfig {
    pub strip_www: bool,
    pub strip_session_ids: bool,
}

impl Default for CanonicalizationConfig {
    fn default() -> Self {
        Self {
            strip_www: true,
            strip_session_ids: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Root for spill files, the journal and the redb seen store.
    pub state_dir: PathBuf,
    /// Bulk-lane entries a queue keeps in memory before spilling to disk.
    pub memory_queue_cap: usize,
    pub key_policy: QueueKeyPolicy,
    pub seen_store: SeenStore,
    /// Pending fingerprints buffered before a redb commit.
    pub seen_flush_batch: usize,
    pub politeness: PolitenessConfig,
    pub retry: RetryConfig,
    pub journal: JournalConfig,
    pub canonicalization: CanonicalizationConfig,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./frontier"),
            memory_queue_cap: Defaults::MEMORY_QUEUE_CAP,
            key_policy: QueueKeyPolicy::default(),
            seen_store: SeenStore::default(),
            seen_flush_batch: Defaults::SEEN_FLUSH_BATCH,
            politeness: PolitenessConfig::default(),
            retry: RetryConfig::default(),
            journal: JournalConfig::default(),
            canonicalization: CanonicalizationConfig::default(),
        }
    }
}

impl FrontierConfig {
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: FrontierConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_queue_cap == 0 {
            return Err(ConfigError::Invalid("memory_queue_cap must be at least 1".into()));
        }
        if self.seen_flush_batch == 0 {
            return Err(ConfigError::Invalid("seen_flush_batch must be at least 1".into()));
        }
        if !self.politeness.delay_factor.is_finite() || self.politeness.delay_factor < 0.0 {
            return Err(ConfigError::Invalid("politeness.delay_factor must be a non-negative number".into()));
        }
        if self.politeness.min_delay_ms > self.politeness.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "politeness.min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.politeness.min_delay_ms, self.politeness.max_delay_ms
            )));
        }
        if self.journal.enabled && self.journal.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("journal.flush_interval_ms must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid("retry.base_delay_ms exceeds retry.max_delay_ms".into()));
        }
        Ok(())
    }

    pub fn queues_dir(&self) -> PathBuf {
        self.state_dir.join("queues")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.state_dir.join(Defaults::JOURNAL_FILE)
    }

    pub fn seen_db_path(&self) -> PathBuf {
        self.state_dir.join("seen.redb")
    }
}
