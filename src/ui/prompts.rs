//! ui::prompts
//!
//! The approval gate capability.
//!
//! # Design
//!
//! Sync is the only agent allowed to solicit human input. The approval
//! source is a small trait so the gate is pluggable: an interactive
//! terminal in normal use, a scripted answer in tests and CI, a
//! file-based gate for unattended setups. This keeps the single human
//! decision point deterministic under test.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use thiserror::Error;

/// Errors from the approval gate.
#[derive(Debug, Error)]
pub enum PromptError {
    /// stdin closed or unreadable.
    #[error("approval input unavailable: {0}")]
    InputUnavailable(String),

    /// The gate file could not be read.
    #[error("approval gate file unreadable: {0}")]
    GateUnreadable(String),
}

/// Source of the single yes/no approval decision.
pub trait ApprovalSource: Send + Sync {
    /// Present `summary` and return the decision.
    fn confirm(&self, summary: &str) -> Result<bool, PromptError>;
}

/// Interactive terminal prompt. Reads one line from stdin; `y`/`yes`
/// (case-insensitive) approves, anything else declines.
#[derive(Debug, Default)]
pub struct InteractivePrompt;

impl ApprovalSource for InteractivePrompt {
    fn confirm(&self, summary: &str) -> Result<bool, PromptError> {
        println!("{}", summary);
        print!("Push these changes? [y/N] ");
        std::io::stdout()
            .flush()
            .map_err(|e| PromptError::InputUnavailable(e.to_string()))?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| PromptError::InputUnavailable(e.to_string()))?;
        Ok(parse_answer(&line))
    }
}

/// Fixed answer, for tests and non-interactive runs.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedApproval(pub bool);

impl ApprovalSource for ScriptedApproval {
    fn confirm(&self, _summary: &str) -> Result<bool, PromptError> {
        Ok(self.0)
    }
}

/// File-based gate: approves when the file's first line parses as yes.
///
/// A missing file declines, so an unattended pipeline defaults to the
/// safe answer.
#[derive(Debug, Clone)]
pub struct FileGate {
    pub path: PathBuf,
}

impl FileGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ApprovalSource for FileGate {
    fn confirm(&self, _summary: &str) -> Result<bool, PromptError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(parse_answer(contents.lines().next().unwrap_or(""))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PromptError::GateUnreadable(e.to_string())),
        }
    }
}

fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
