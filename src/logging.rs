//! Tracing setup: daily rolling text and JSON files plus compact stdout.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the non-blocking writers alive. Dropping it flushes and stops file logging.
pub struct LogGuards {
    _text: WorkerGuard,
    _json: WorkerGuard,
}

/// Install the global subscriber writing `frontier.log` and `frontier.json.log` under `log_dir`.
///
/// `RUST_LOG` controls filtering (default `info`).
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<LogGuards, Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let (text_writer, text_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_path, "frontier.log"));
    let (json_writer, json_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_path, "frontier.json.log"));

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter.clone());

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_filter(env_filter.clone());

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()?;

    tracing::info!(dir = %log_path.display(), "logging initialized");

    Ok(LogGuards {
        _text: text_guard,
        _json: json_guard,
    })
}

/// Stdout-only subscriber for short CLI commands.
pub fn init_stdout_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logging_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("logs");

        // Only one global subscriber per process; a second init may fail but the directory is created first.
        let _ = init_logging(&log_path);
        assert!(log_path.exists());
    }
}
