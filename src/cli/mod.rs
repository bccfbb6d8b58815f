//! cli
//!
//! Command-line interface layer.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Delegate to command handlers
//! - Map results to the documented exit codes:
//!   0 success, 1 blocking failure, 2 declined at the gate,
//!   3 configuration error, 4 lock held
//!
//! The CLI layer is thin: all repository mutations flow through the
//! pipeline and its hub manager.

pub mod args;
pub mod commands;

pub use args::{Cli, Command};

/// Exit code for a configuration error.
pub const EXIT_CONFIG: i32 = 3;

/// Exit code when another run holds the pipeline lock.
pub const EXIT_LOCK_HELD: i32 = 4;

use crate::ui::Verbosity;

/// Run the CLI application, returning the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse_args();
    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug);

    match commands::dispatch(cli, verbosity) {
        Ok(code) => code,
        Err(e) => {
            crate::ui::output::error(e);
            1
        }
    }
}
