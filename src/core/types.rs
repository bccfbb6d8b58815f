//! core::types
//!
//! Domain types shared across the pipeline.
//!
//! # Design
//!
//! Identifiers and statuses are small, serializable value types. The run
//! identifier is validated at construction so branch names built from it
//! are always well-formed. Statuses are plain enums with readable wire
//! representations so cache files stay inspectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors from constructing domain types.
#[derive(Debug, Error)]
pub enum TypeError {
    /// Run id token is not 8 lowercase hex characters.
    #[error("invalid run id: {0}")]
    InvalidRunId(String),
}

/// Identifier for a single pipeline run.
///
/// An 8-hex-character token derived from a v4 UUID. Short enough to be
/// readable inside branch names (`commitly/test/<run_id>`), unique enough
/// that a collision is treated as a hard abort by the hub manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Generate a fresh run id.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(uuid[..8].to_string())
    }

    /// Parse an existing token (e.g. from a persisted run context).
    pub fn parse(token: &str) -> Result<Self, TypeError> {
        let valid = token.len() == 8
            && token
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if valid {
            Ok(Self(token.to_string()))
        } else {
            Err(TypeError::InvalidRunId(token.to_string()))
        }
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The seven pipeline agents, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Clone,
    Code,
    Test,
    Refactor,
    Sync,
    Notify,
    Report,
}

impl AgentKind {
    /// All agents in pipeline order.
    pub const ORDER: [AgentKind; 7] = [
        AgentKind::Clone,
        AgentKind::Code,
        AgentKind::Test,
        AgentKind::Refactor,
        AgentKind::Sync,
        AgentKind::Notify,
        AgentKind::Report,
    ];

    /// Lowercase name used in branch names, log dirs, and cache files.
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Clone => "clone",
            AgentKind::Code => "code",
            AgentKind::Test => "test",
            AgentKind::Refactor => "refactor",
            AgentKind::Sync => "sync",
            AgentKind::Notify => "notify",
            AgentKind::Report => "report",
        }
    }

    /// Whether failure of this agent aborts the pipeline.
    ///
    /// Notify and Report are observational; everything before them is
    /// load-bearing for the published result.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, AgentKind::Notify | AgentKind::Report)
    }

    /// The derivative branch this agent creates on the hub, if any.
    pub fn branch(&self, run_id: &RunId) -> Option<String> {
        match self {
            AgentKind::Clone | AgentKind::Code | AgentKind::Test | AgentKind::Refactor => {
                Some(format!("commitly/{}/{}", self.name(), run_id))
            }
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    ApprovedNoPush,
    Aborted,
}

impl RunStatus {
    /// Process exit code for this terminal status.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed | RunStatus::Aborted => 1,
            RunStatus::ApprovedNoPush => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::ApprovedNoPush => "approved_no_push",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Status of a single agent within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Blocked,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Succeeded => "succeeded",
            AgentStatus::Failed => "failed",
            AgentStatus::Skipped => "skipped",
            AgentStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Classified failure categories surfaced to users and cache files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    ConfigurationMissing,
    LockHeld,
    HubUnavailable,
    PatchConflict,
    EnvironmentBlocked,
    StaticCheckFailed,
    RuntimeFailed,
    TestFailed,
    QueryParseFailed,
    DatabaseUnavailable,
    LlmUnavailable,
    PushFailed,
    Cancelled,
    InternalInvariantViolated,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde kebab-case spelling for display.
        let json = serde_json::to_string(self).expect("ErrorKind serializes");
        f.write_str(json.trim_matches('"'))
    }
}

/// Structured error captured at the agent boundary.
///
/// Agents return errors as values; the harness serializes this record
/// into the run context and cache files so post-mortems never depend on
/// scraping terminal output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    /// Underlying cause chain, outermost first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Actionable hint for the user (e.g. the manual push command).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            hint: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

/// One commit recorded by the user action that triggered the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full content hash.
    pub id: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Handle to the user's repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoHandle {
    /// Absolute path to the user's working tree.
    pub workspace_path: PathBuf,
    /// Remote name, default `origin`.
    pub remote_name: String,
    /// Currently checked-out branch.
    pub working_branch: String,
    /// Commits introduced by the just-recorded user action.
    pub user_commits: Vec<CommitInfo>,
}

impl RepoHandle {
    /// Repository directory name, used to derive the hub path.
    pub fn repo_name(&self) -> String {
        self.workspace_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod run_id {
        use super::*;

        #[test]
        fn generate_is_eight_hex_chars() {
            let id = RunId::generate();
            assert_eq!(id.as_str().len(), 8);
            assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }

        #[test]
        fn generate_is_unique() {
            assert_ne!(RunId::generate(), RunId::generate());
        }

        #[test]
        fn parse_valid() {
            let id = RunId::parse("deadbeef").unwrap();
            assert_eq!(id.as_str(), "deadbeef");
        }

        #[test]
        fn parse_rejects_wrong_length() {
            assert!(RunId::parse("abc").is_err());
            assert!(RunId::parse("deadbeef0").is_err());
        }

        #[test]
        fn parse_rejects_non_hex() {
            assert!(RunId::parse("deadbeez").is_err());
            assert!(RunId::parse("DEADBEEF").is_err());
        }

        #[test]
        fn serde_is_transparent() {
            let id = RunId::parse("0a1b2c3d").unwrap();
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, "\"0a1b2c3d\"");
        }
    }

    mod agent_kind {
        use super::*;

        #[test]
        fn order_has_seven_agents() {
            assert_eq!(AgentKind::ORDER.len(), 7);
            assert_eq!(AgentKind::ORDER[0], AgentKind::Clone);
            assert_eq!(AgentKind::ORDER[6], AgentKind::Report);
        }

        #[test]
        fn blocking_split() {
            assert!(AgentKind::Clone.is_blocking());
            assert!(AgentKind::Sync.is_blocking());
            assert!(!AgentKind::Notify.is_blocking());
            assert!(!AgentKind::Report.is_blocking());
        }

        #[test]
        fn branch_naming_scheme() {
            let run = RunId::parse("0a1b2c3d").unwrap();
            assert_eq!(
                AgentKind::Clone.branch(&run).unwrap(),
                "commitly/clone/0a1b2c3d"
            );
            assert_eq!(
                AgentKind::Refactor.branch(&run).unwrap(),
                "commitly/refactor/0a1b2c3d"
            );
        }

        #[test]
        fn non_branching_agents() {
            let run = RunId::generate();
            assert!(AgentKind::Sync.branch(&run).is_none());
            assert!(AgentKind::Notify.branch(&run).is_none());
            assert!(AgentKind::Report.branch(&run).is_none());
        }
    }

    mod run_status {
        use super::*;

        #[test]
        fn exit_codes() {
            assert_eq!(RunStatus::Succeeded.exit_code(), 0);
            assert_eq!(RunStatus::Failed.exit_code(), 1);
            assert_eq!(RunStatus::ApprovedNoPush.exit_code(), 2);
            assert_eq!(RunStatus::Aborted.exit_code(), 1);
        }

        #[test]
        fn wire_format() {
            let json = serde_json::to_string(&RunStatus::ApprovedNoPush).unwrap();
            assert_eq!(json, "\"approved_no_push\"");
        }
    }

    mod error_record {
        use super::*;

        #[test]
        fn display_with_cause() {
            let rec = ErrorRecord::new(ErrorKind::PatchConflict, "3 hunks rejected")
                .with_cause("git apply exited 1");
            let msg = rec.to_string();
            assert!(msg.contains("patch-conflict"));
            assert!(msg.contains("3 hunks rejected"));
            assert!(msg.contains("git apply exited 1"));
        }

        #[test]
        fn kind_serializes_kebab_case() {
            let json = serde_json::to_string(&ErrorKind::LlmUnavailable).unwrap();
            assert_eq!(json, "\"llm-unavailable\"");
        }

        #[test]
        fn kind_display_matches_wire_format() {
            assert_eq!(ErrorKind::HubUnavailable.to_string(), "hub-unavailable");
            assert_eq!(
                ErrorKind::InternalInvariantViolated.to_string(),
                "internal-invariant-violated"
            );
        }
    }

    mod repo_handle {
        use super::*;

        #[test]
        fn repo_name_from_path() {
            let handle = RepoHandle {
                workspace_path: PathBuf::from("/home/dev/myproj"),
                remote_name: "origin".to_string(),
                working_branch: "main".to_string(),
                user_commits: vec![],
            };
            assert_eq!(handle.repo_name(), "myproj");
        }
    }
}
