use rust_frontier::cli::{Cli, Commands};
use rust_frontier::config::{ConfigError, FrontierConfig};
use rust_frontier::frontier::{CheckpointManifest, Frontier, FrontierError};
use rust_frontier::journal::{self, JournalError};
use rust_frontier::logging::{LogGuards, init_logging, init_stdout_logging};
use std::path::Path;
use std::process::ExitCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] FrontierError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

fn load_config(path: Option<&str>, state_dir: Option<&str>) -> Result<FrontierConfig, MainError> {
    let mut config = match path {
        Some(path) => FrontierConfig::from_file(path)?,
        None => FrontierConfig::default(),
    };
    if let Some(dir) = state_dir {
        config.state_dir = dir.into();
    }
    config.validate()?;
    Ok(config)
}

fn run_replay(
    config: FrontierConfig,
    journal_path: &Path,
    checkpoint_dir: Option<&str>,
) -> Result<(), MainError> {
    // Opening rotates the state directory's own journal out of the way.
    let own_journal = match (journal_path.canonicalize(), config.journal_path().canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    let frontier = Frontier::open(config)?;
    let source = match frontier.journal().and_then(|j| j.previous_journal()) {
        Some(previous) if own_journal => previous.to_path_buf(),
        _ => journal_path.to_path_buf(),
    };
    let report = journal::replay(&source, &frontier)?;
    println!("Replay: {}", report);
    println!("{}", frontier.stats());

    if let Some(dir) = checkpoint_dir {
        let manifest = frontier.checkpoint(Path::new(dir))?;
        println!(
            "Checkpoint written to {} ({} queues, {} pending)",
            dir,
            manifest.queues.len(),
            manifest.pending
        );
    }
    frontier.close()?;
    Ok(())
}

fn run_journal_stats(path: &Path, json: bool) -> Result<(), MainError> {
    let stats = journal::journal_stats(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    for (op, count) in &stats.records {
        println!("{:<3} {}", op.code(), count);
    }
    println!("malformed lines: {}", stats.malformed);
    if stats.truncated {
        println!("journal ends with a truncated record");
    }
    Ok(())
}

fn run_inspect(dir: &Path, json: bool) -> Result<(), MainError> {
    let manifest = CheckpointManifest::load(dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }
    println!(
        "Checkpoint v{} created at {} ms: {} queues, {} pending, {} seen",
        manifest.version,
        manifest.created_at_ms,
        manifest.queues.len(),
        manifest.pending,
        manifest.seen_count
    );
    for queue in &manifest.queues {
        println!(
            "  {:<40} {:?} memory={} disk={} errors={}{}",
            queue.key,
            queue.state,
            queue.memory_entries,
            queue.spill.head_records + queue.spill.tail_records,
            queue.error_count,
            if queue.unavailable { " UNAVAILABLE" } else { "" }
        );
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), MainError> {
    let mut _guards: Option<LogGuards> = None;

    match cli.command {
        Commands::Replay {
            journal,
            state_dir,
            checkpoint_dir,
            log_to_file,
        } => {
            let config = load_config(cli.config.as_deref(), Some(&state_dir))?;
            if log_to_file {
                _guards = Some(
                    init_logging(config.state_dir.join("logs")).map_err(|e| MainError::Logging(e.to_string()))?,
                );
            } else {
                init_stdout_logging();
            }
            run_replay(config, Path::new(&journal), checkpoint_dir.as_deref())
        }
        Commands::JournalStats { journal, json } => {
            init_stdout_logging();
            run_journal_stats(Path::new(&journal), json)
        }
        Commands::Inspect { checkpoint_dir, json } => {
            init_stdout_logging();
            run_inspect(Path::new(&checkpoint_dir), json)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(3)
        }
    }
}
