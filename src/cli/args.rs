//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! - `--cwd <path>`: run as if started in that directory
//! - `--debug`: verbose diagnostics
//! - `--quiet` / `-q`: minimal output
//! - `--yes` / `--no`: scripted answer for the approval gate
//! - `--approval-file <path>`: file-based approval gate

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Commitly - post-commit pipeline for a local repository
#[derive(Parser, Debug)]
#[command(name = "commitly")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if commitly was started in this directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Answer the approval gate with yes (no prompt)
    #[arg(long, global = true, conflicts_with_all = ["no", "approval_file"])]
    pub yes: bool,

    /// Answer the approval gate with no (no prompt)
    #[arg(long, global = true, conflicts_with = "approval_file")]
    pub no: bool,

    /// Read the approval answer from a file (first line y/yes approves)
    #[arg(long, global = true, value_name = "PATH")]
    pub approval_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scaffold the local state directory and a starter configuration
    Init,

    /// Record a commit in the user repo, then run the pipeline
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Render a report over past runs
    Report {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Output format (md, pdf, html); non-md degrades to md
        #[arg(long)]
        format: Option<String>,
    },

    /// Print the last run summary
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn commit_requires_message() {
        assert!(Cli::try_parse_from(["commitly", "commit"]).is_err());
        let cli = Cli::try_parse_from(["commitly", "commit", "-m", "fix bug"]).unwrap();
        match cli.command {
            Command::Commit { message } => assert_eq!(message, "fix bug"),
            _ => panic!("expected commit"),
        }
    }

    #[test]
    fn yes_and_no_conflict() {
        assert!(Cli::try_parse_from(["commitly", "--yes", "--no", "status"]).is_err());
    }

    #[test]
    fn report_takes_date_range() {
        let cli = Cli::try_parse_from([
            "commitly", "report", "--from", "2024-03-01", "--to", "2024-03-09",
        ])
        .unwrap();
        match cli.command {
            Command::Report { from, to, format } => {
                assert_eq!(from, "2024-03-01");
                assert_eq!(to, "2024-03-09");
                assert!(format.is_none());
            }
            _ => panic!("expected report"),
        }
    }
}
