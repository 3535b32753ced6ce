use crate::candidate::{CandidateUri, FetchStatus, Priority};
use crate::frontier::{Frontier, FrontierError, ScheduleOutcome};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep};

pub const PROGRESS_INTERVAL: u64 = 1000;

/// What the fetch pipeline reports for one URI.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success {
        duration_ms: u64,
        discovered: Vec<CandidateUri>,
    },
    /// Try again later at the given priority.
    Retry { duration_ms: u64, priority: Priority },
    Failure { duration_ms: u64, reason: String },
}

#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, curi: &CandidateUri) -> FetchOutcome;
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub workers: usize,
    /// Upper bound on how long an idle driver waits before asking the frontier again.
    pub idle_poll: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            workers: 64,
            idle_poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DriverReport {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rescheduled: u64,
    pub discovered: u64,
    pub task_errors: u64,
    /// Pending URIs left in unavailable queues when the driver stopped.
    pub stranded: u64,
    pub duration_ms: u64,
    pub interrupted: bool,
}

/// Runs a fixed number of fetch tasks against a frontier until it drains or
/// shutdown is signalled. Fetches run outside every frontier lock.
pub struct CrawlDriver<F: Fetcher> {
    frontier: Arc<Frontier>,
    fetcher: Arc<F>,
    config: DriverConfig,
    shutdown: watch::Receiver<bool>,
}

impl<F: Fetcher> CrawlDriver<F> {
    pub fn new(frontier: Arc<Frontier>, fetcher: Arc<F>, config: DriverConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            frontier,
            fetcher,
            config,
            shutdown,
        }
    }

    pub async fn run(&mut self) -> Result<DriverReport, FrontierError> {
        let start = Instant::now();
        let mut report = DriverReport::default();
        let mut in_flight: JoinSet<(CandidateUri, FetchOutcome)> = JoinSet::new();
        let workers = self.config.workers.max(1);

        tracing::info!(workers, "crawl driver started");

        loop {
            if *self.shutdown.borrow() {
                report.interrupted = true;
                tracing::info!(in_flight = in_flight.len(), "shutdown requested, draining in-flight fetches");
                break;
            }

            // Phase 1: fill worker pool
            while in_flight.len() < workers {
                match self.frontier.next()? {
                    Some(mut curi) => {
                        curi.fetch_attempts += 1;
                        let fetcher = self.fetcher.clone();
                        in_flight.spawn(async move {
                            let outcome = fetcher.fetch(&curi).await;
                            (curi, outcome)
                        });
                    }
                    None => break,
                }
            }

            // Phase 2: completion check, or wait for a snoozed queue
            if in_flight.is_empty() {
                if self.frontier.is_empty() {
                    tracing::info!("frontier drained and no fetches in flight");
                    break;
                }
                if self.frontier.is_stalled() {
                    report.stranded = self.frontier.pending();
                    tracing::warn!(stranded = report.stranded, "only unavailable queues hold pending URIs, stopping");
                    break;
                }
                let wait = self
                    .frontier
                    .next_wake_time()
                    .map(|at| at.saturating_duration_since(std::time::Instant::now()))
                    .unwrap_or(self.config.idle_poll)
                    .min(self.config.idle_poll);
                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = self.shutdown.changed() => {}
                }
                continue;
            }

            // Phase 3: collect one completed task
            tokio::select! {
                joined = in_flight.join_next() => {
                    if let Some(result) = joined {
                        self.handle_joined(result, &mut report)?;
                    }
                }
                _ = sleep(self.config.idle_poll) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        while let Some(result) = in_flight.join_next().await {
            self.handle_joined(result, &mut report)?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            rescheduled = report.rescheduled,
            interrupted = report.interrupted,
            "crawl driver finished"
        );
        Ok(report)
    }

    fn handle_joined(
        &self,
        result: Result<(CandidateUri, FetchOutcome), tokio::task::JoinError>,
        report: &mut DriverReport,
    ) -> Result<(), FrontierError> {
        match result {
            Ok((curi, outcome)) => {
                self.complete(curi, outcome, report)?;
                report.processed += 1;
                if report.processed % PROGRESS_INTERVAL == 0 {
                    tracing::info!(processed = report.processed, stats = %self.frontier.stats(), "progress");
                }
            }
            Err(e) => {
                report.task_errors += 1;
                tracing::error!(error = %e, "fetch task join error");
            }
        }
        Ok(())
    }

    fn complete(&self, mut curi: CandidateUri, outcome: FetchOutcome, report: &mut DriverReport) -> Result<(), FrontierError> {
        match outcome {
            FetchOutcome::Success { duration_ms, discovered } => {
                // Outlinks go in before the success record so replay never loses them.
                for link in discovered {
                    if self.frontier.schedule(link)? == ScheduleOutcome::Scheduled {
                        report.discovered += 1;
                    }
                }
                curi.fetch_status = FetchStatus::Succeeded;
                curi.fetch_duration_ms = Some(duration_ms);
                self.frontier.succeeded(&curi)?;
                report.succeeded += 1;
            }
            FetchOutcome::Retry { duration_ms, priority } => {
                curi.fetch_duration_ms = Some(duration_ms);
                if self.frontier.rescheduled(curi, priority)? {
                    report.rescheduled += 1;
                } else {
                    report.failed += 1;
                }
            }
            FetchOutcome::Failure { duration_ms, reason } => {
                tracing::debug!(uri = curi.uri(), %reason, "fetch failed");
                curi.fetch_status = FetchStatus::Failed;
                curi.fetch_duration_ms = Some(duration_ms);
                self.frontier.failed(&curi)?;
                report.failed += 1;
            }
        }
        Ok(())
    }
}

/// A shutdown channel flipped by the first Ctrl+C. A second Ctrl+C exits immediately.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received Ctrl+C, finishing in-flight fetches; press again to force quit");
            let _ = shutdown_tx.send(true);

            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::error!("force quit requested");
                std::process::exit(1);
            }
        }
    });

    shutdown_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Hop;
    use crate::config::{FrontierConfig, PolitenessConfig};
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Each seed links to five pages on its own host. Flags any overlap of fetches on one host.
    #[derive(Default)]
    struct SiteFetcher {
        active: DashMap<String, u32>,
        overlap: AtomicBool,
        retry_first: bool,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Fetcher for SiteFetcher {
        async fn fetch(&self, curi: &CandidateUri) -> FetchOutcome {
            let host = url::Url::parse(curi.uri()).unwrap().host_str().unwrap().to_string();
            {
                let mut count = self.active.entry(host.clone()).or_insert(0);
                *count += 1;
                if *count > 1 {
                    self.overlap.store(true, Ordering::SeqCst);
                }
            }
            sleep(Duration::from_millis(2)).await;
            *self.active.get_mut(&host).unwrap() -= 1;

            if self.retry_first && curi.fetch_attempts == 1 {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                return FetchOutcome::Retry {
                    duration_ms: 2,
                    priority: Priority::Normal,
                };
            }

            let discovered = if curi.is_seed() {
                (0..5)
                    .map(|i| CandidateUri::discovered(format!("http://{}/page{}", host, i), curi, Hop::Navlink))
                    .collect()
            } else {
                Vec::new()
            };
            FetchOutcome::Success {
                duration_ms: 2,
                discovered,
            }
        }
    }

    fn frontier(dir: &TempDir) -> Arc<Frontier> {
        let mut config = FrontierConfig::new(dir.path());
        config.politeness = PolitenessConfig::none();
        config.journal.enabled = false;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        Arc::new(Frontier::open(config).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_drains_frontier_without_host_overlap() {
        let dir = TempDir::new().unwrap();
        let frontier = frontier(&dir);
        for i in 0..4 {
            frontier.schedule(CandidateUri::seed(format!("http://host{}.com/", i))).unwrap();
        }

        let fetcher = Arc::new(SiteFetcher::default());
        let (_tx, rx) = watch::channel(false);
        let config = DriverConfig {
            workers: 8,
            idle_poll: Duration::from_millis(10),
        };
        let report = CrawlDriver::new(frontier.clone(), fetcher.clone(), config, rx)
            .run()
            .await
            .unwrap();

        assert_eq!(report.processed, 24);
        assert_eq!(report.succeeded, 24);
        assert_eq!(report.discovered, 20);
        assert!(!fetcher.overlap.load(Ordering::SeqCst));
        assert!(frontier.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retry_then_success() {
        let dir = TempDir::new().unwrap();
        let frontier = frontier(&dir);
        frontier.schedule(CandidateUri::seed("http://solo.com/")).unwrap();

        let fetcher = Arc::new(SiteFetcher {
            retry_first: true,
            ..Default::default()
        });
        let (_tx, rx) = watch::channel(false);
        let config = DriverConfig {
            workers: 2,
            idle_poll: Duration::from_millis(5),
        };
        let report = CrawlDriver::new(frontier.clone(), fetcher.clone(), config, rx)
            .run()
            .await
            .unwrap();

        // Seed and each page are retried once before succeeding.
        assert_eq!(report.rescheduled, 6);
        assert_eq!(report.succeeded, 6);
        assert_eq!(fetcher.attempts.load(Ordering::SeqCst), 6);
        assert!(frontier.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let dir = TempDir::new().unwrap();
        let frontier = frontier(&dir);
        frontier.schedule(CandidateUri::seed("http://a.com/")).unwrap();

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let report = CrawlDriver::new(frontier.clone(), Arc::new(SiteFetcher::default()), DriverConfig::default(), rx)
            .run()
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.processed, 0);
        assert_eq!(frontier.pending(), 1);
    }

    #[tokio::test]
    async fn test_stops_when_only_broken_queues_remain() {
        let dir = TempDir::new().unwrap();
        let mut config = FrontierConfig::new(dir.path());
        config.politeness = PolitenessConfig::none();
        config.journal.enabled = false;
        config.memory_queue_cap = 1;
        let queues_dir = config.queues_dir();
        let frontier = Arc::new(Frontier::open(config).unwrap());
        let root = CandidateUri::seed("http://a.com/");
        for i in 0..2 {
            let page = CandidateUri::discovered(format!("http://a.com/{}", i), &root, Hop::Navlink);
            frontier.schedule(page).unwrap();
        }

        // The spilled entry becomes unreachable.
        std::fs::remove_dir_all(&queues_dir).unwrap();
        std::fs::write(&queues_dir, b"").unwrap();

        let (_tx, rx) = watch::channel(false);
        let config = DriverConfig {
            workers: 2,
            idle_poll: Duration::from_millis(5),
        };
        let report = CrawlDriver::new(frontier.clone(), Arc::new(SiteFetcher::default()), config, rx)
            .run()
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.stranded, 1);
        assert_eq!(frontier.discard_queue("a.com").unwrap(), 1);
        assert!(frontier.is_empty());
    }
}
