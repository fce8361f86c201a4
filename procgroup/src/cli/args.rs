//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Procgroup - run a group of processes as one unit
#[derive(Parser, Debug)]
#[command(name = "procgroup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every process in a manifest to completion
    Run {
        /// Path to the group manifest (JSON)
        manifest: PathBuf,

        /// Dispatch workers (0 = sequential); overrides the manifest
        #[arg(short, long)]
        partition: Option<usize>,

        /// Pause after each sequential start, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Bound on the sequential wait, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Fail if any process exits abnormally
        #[arg(long)]
        check: bool,
    },

    /// Start the group and wait until every process is available
    Ready {
        /// Path to the group manifest (JSON)
        manifest: PathBuf,

        /// Availability deadline, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Parse a manifest and list its processes
    Validate {
        /// Path to the group manifest (JSON)
        manifest: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["procgroup", "run", "group.json", "-p", "3", "--check"]);
        match cli.command {
            Commands::Run {
                manifest,
                partition,
                check,
                delay_ms,
                ..
            } => {
                assert_eq!(manifest, PathBuf::from("group.json"));
                assert_eq!(partition, Some(3));
                assert!(check);
                assert_eq!(delay_ms, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ready() {
        let cli = Cli::parse_from(["procgroup", "ready", "group.json", "--timeout-ms", "1500"]);
        assert!(matches!(
            cli.command,
            Commands::Ready {
                timeout_ms: Some(1500),
                ..
            }
        ));
    }
}
