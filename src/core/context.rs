//! core::context
//!
//! Shared pipeline state threaded through the agents.
//!
//! # Ownership
//!
//! The run context is owned by the orchestrator. Agents receive it as
//! `&mut RunContext` through the agent harness, which reserializes it to
//! `.commitly/cache/run_context.json` after every agent returns. Partial
//! runs are therefore always inspectable on disk.
//!
//! Collaborator handles (git gateway, language model, approval source)
//! are deliberately not part of this struct: they are not serializable
//! and live beside the context in the orchestrator.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{AgentKind, AgentStatus, CommitInfo, ErrorRecord, RunId, RunStatus};

/// Errors from context persistence.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("context serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A located SQL literal inside a source file.
///
/// # Invariants
///
/// - `line_start <= line_end` (1-based, inclusive)
/// - at discovery time, lines `[line_start, line_end]` of `file_path`
///   equal `original_text`
/// - replacement preserves the indentation prefix of `line_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySite {
    /// Absolute path within the hub.
    pub file_path: PathBuf,
    /// Enclosing function or method name.
    pub symbol: String,
    pub line_start: usize,
    pub line_end: usize,
    pub original_text: String,
    pub dialect: String,
    pub referenced_tables: Vec<String>,
}

/// Outcome of one agent within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Measured wall-clock duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Derivative branch created by this agent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Agent-specific structured output.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl AgentOutcome {
    pub fn pending() -> Self {
        Self {
            status: AgentStatus::Pending,
            started_at: None,
            ended_at: None,
            elapsed_ms: None,
            branch: None,
            data: serde_json::Value::Null,
            error: None,
            log_path: None,
        }
    }
}

/// Execution profile for subprocess invocations inside the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionProfile {
    /// Primary run command string (shell-quoted).
    pub run_command: String,
    /// Project test command string (shell-quoted).
    pub test_command: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Advisory memory cap in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    /// Interpreter binary path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<PathBuf>,
}

/// The typed shared state threaded through all agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    // Identity
    pub run_id: RunId,
    pub project_name: String,

    // Paths
    pub workspace_path: PathBuf,
    pub hub_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file_path: Option<PathBuf>,

    // VCS
    pub remote_name: String,
    pub working_branch: String,
    pub user_commits: Vec<CommitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refactor_branch: Option<String>,

    // Change set
    pub changed_files: Vec<PathBuf>,
    pub has_embedded_queries: bool,
    pub embedded_query_sites: Vec<QuerySite>,

    // Execution profile
    pub execution: ExecutionProfile,

    // Failure bookkeeping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Hub commit recorded before the user diff was applied; revert
    /// target on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_anchor: Option<String>,

    /// Per-agent outcome map, keyed by agent name for readable JSON.
    pub outcomes: BTreeMap<String, AgentOutcome>,
}

impl RunContext {
    /// Create a fresh context with all agents pending.
    pub fn new(
        run_id: RunId,
        project_name: String,
        workspace_path: PathBuf,
        hub_path: PathBuf,
        remote_name: String,
        working_branch: String,
        user_commits: Vec<CommitInfo>,
        execution: ExecutionProfile,
    ) -> Self {
        let outcomes = AgentKind::ORDER
            .iter()
            .map(|kind| (kind.name().to_string(), AgentOutcome::pending()))
            .collect();

        Self {
            run_id,
            project_name,
            workspace_path,
            hub_path,
            env_file_path: None,
            remote_name,
            working_branch,
            user_commits,
            clone_branch: None,
            code_branch: None,
            test_branch: None,
            refactor_branch: None,
            changed_files: vec![],
            has_embedded_queries: false,
            embedded_query_sites: vec![],
            execution,
            error: None,
            rollback_anchor: None,
            outcomes,
        }
    }

    /// Outcome for one agent.
    pub fn outcome(&self, kind: AgentKind) -> &AgentOutcome {
        &self.outcomes[kind.name()]
    }

    /// Mutable outcome for one agent.
    pub fn outcome_mut(&mut self, kind: AgentKind) -> &mut AgentOutcome {
        self.outcomes
            .get_mut(kind.name())
            .expect("all agents present in outcome map")
    }

    /// Record the branch an agent created, both in its outcome and in the
    /// dedicated context field.
    pub fn set_branch(&mut self, kind: AgentKind, branch: String) {
        match kind {
            AgentKind::Clone => self.clone_branch = Some(branch.clone()),
            AgentKind::Code => self.code_branch = Some(branch.clone()),
            AgentKind::Test => self.test_branch = Some(branch.clone()),
            AgentKind::Refactor => self.refactor_branch = Some(branch.clone()),
            _ => {}
        }
        self.outcome_mut(kind).branch = Some(branch);
    }

    /// The most recent successfully created derivative branch at or
    /// before `failed`, used as the rollback target.
    pub fn last_successful_branch(&self, failed: AgentKind) -> Option<String> {
        let failed_pos = AgentKind::ORDER.iter().position(|k| *k == failed)?;
        AgentKind::ORDER[..failed_pos]
            .iter()
            .rev()
            .filter(|k| self.outcome(**k).status == AgentStatus::Succeeded)
            .find_map(|k| self.outcome(*k).branch.clone())
    }

    /// Branches created by the failing agent and everything after it.
    pub fn branches_from(&self, failed: AgentKind) -> Vec<String> {
        let failed_pos = AgentKind::ORDER
            .iter()
            .position(|k| *k == failed)
            .unwrap_or(0);
        AgentKind::ORDER[failed_pos..]
            .iter()
            .filter_map(|k| self.outcome(*k).branch.clone())
            .collect()
    }

    /// All four derivative branch names for this run.
    pub fn derivative_branches(&self) -> Vec<String> {
        [
            &self.clone_branch,
            &self.code_branch,
            &self.test_branch,
            &self.refactor_branch,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }

    /// Persist the context as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ContextError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a persisted context.
    pub fn load(path: &Path) -> Result<Self, ContextError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Record of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub outcomes: BTreeMap<String, AgentOutcome>,
}

/// One agent's cache file (`.commitly/cache/<agent>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCacheFile {
    pub run_id: RunId,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
}

impl AgentCacheFile {
    /// Persist the cache file as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ContextError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load one agent cache file.
    pub fn load(path: &Path) -> Result<Self, ContextError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}
