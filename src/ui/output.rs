//! ui::output
//!
//! Output formatting for the CLI.
//!
//! Output respects the quiet flag; errors are always shown.

use std::fmt::Display;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Debug,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}

/// One-line per-agent progress marker, e.g. `[test] succeeded (3.2s)`.
pub fn agent_line(agent: &str, status: impl Display, elapsed_ms: Option<u64>) -> String {
    match elapsed_ms {
        Some(ms) => format!("[{}] {} ({:.1}s)", agent, status, ms as f64 / 1000.0),
        None => format!("[{}] {}", agent, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn agent_line_formats() {
        assert_eq!(
            agent_line("test", "succeeded", Some(3200)),
            "[test] succeeded (3.2s)"
        );
        assert_eq!(agent_line("clone", "running", None), "[clone] running");
    }
}
