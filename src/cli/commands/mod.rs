//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! Each handler validates its arguments, builds the collaborators it
//! needs, and returns the process exit code. The `commit` handler is
//! async underneath (subprocesses, network I/O) and bridges with a
//! tokio runtime created at the command boundary.

mod commit;
mod init;
mod report_cmd;
mod status;

pub use commit::commit;
pub use init::init;
pub use report_cmd::report;
pub use status::status;

use std::path::PathBuf;

use anyhow::Result;

use super::args::{Cli, Command};
use crate::ui::Verbosity;

/// Dispatch a parsed command line to its handler.
pub fn dispatch(cli: Cli, verbosity: Verbosity) -> Result<i32> {
    let workspace = resolve_workspace(cli.cwd.clone())?;

    match cli.command {
        Command::Init => init(&workspace, verbosity),
        Command::Commit { ref message } => commit(&workspace, message, &cli, verbosity),
        Command::Report {
            ref from,
            ref to,
            ref format,
        } => report(&workspace, from, to, format.as_deref(), verbosity),
        Command::Status => status(&workspace, verbosity),
    }
}

/// Absolute workspace directory: `--cwd` or the current directory.
fn resolve_workspace(cwd: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(dir.canonicalize()?)
}
