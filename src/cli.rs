use clap::{Parser, Subcommand};

/// Operator tooling for frontier state directories.
/// Exit codes: 0=success, 2=invalid arguments, 3=I/O, journal or state error
#[derive(Parser, Debug)]
#[command(name = "frontier")]
#[command(about = "Inspect and rebuild crawl frontier state")]
#[command(version)]
pub struct Cli {
    /// JSON config file; command-line paths override its state_dir.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild a frontier from a recovery journal, optionally writing a checkpoint.
    Replay {
        #[arg(short, long, help = "Journal to replay (gzip text)")]
        journal: String,

        #[arg(short, long, default_value = "./frontier", help = "State directory for the rebuilt frontier")]
        state_dir: String,

        #[arg(long, help = "Write a checkpoint of the rebuilt frontier to this directory")]
        checkpoint_dir: Option<String>,

        #[arg(long, help = "Log to <state_dir>/logs as well as stdout")]
        log_to_file: bool,
    },

    /// Count journal records per operation.
    JournalStats {
        #[arg(short, long, help = "Journal to read")]
        journal: String,

        #[arg(long, help = "Print JSON instead of text")]
        json: bool,
    },

    /// Summarize a checkpoint directory.
    Inspect {
        #[arg(help = "Checkpoint directory containing frontier.json")]
        checkpoint_dir: String,

        #[arg(long, help = "Print JSON instead of text")]
        json: bool,
    },
}

impl Cli {
    /// On error, clap prints help and exits with code 2.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_command() {
        let cli = Cli::try_parse_from([
            "frontier",
            "replay",
            "--journal",
            "old.recover.gz",
            "--checkpoint-dir",
            "./cp",
        ])
        .unwrap();
        match cli.command {
            Commands::Replay {
                journal,
                state_dir,
                checkpoint_dir,
                log_to_file,
            } => {
                assert_eq!(journal, "old.recover.gz");
                assert_eq!(state_dir, "./frontier");
                assert_eq!(checkpoint_dir.as_deref(), Some("./cp"));
                assert!(!log_to_file);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["frontier", "inspect", "./cp", "--config", "f.json"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("f.json"));
        assert!(matches!(cli.command, Commands::Inspect { json: false, .. }));
    }

    #[test]
    fn test_journal_stats_requires_journal() {
        assert!(Cli::try_parse_from(["frontier", "journal-stats"]).is_err());
    }
}
