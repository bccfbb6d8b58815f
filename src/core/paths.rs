//! core::paths
//!
//! Centralized path routing for Commitly storage locations.
//!
//! # Storage Layout
//!
//! All local state lives under `<workspace>/.commitly/`:
//! - `config.yaml` - optional repo-local config override
//! - `lock` - exclusive pipeline lock file
//! - `cache/run_context.json` - run context snapshot, rewritten per agent
//! - `cache/<agent>.json` - one cache file per agent
//! - `logs/<agent>/<ISO-timestamp>.log` - per-agent execution logs
//! - `logs/git/<ISO-timestamp>.log` - git gateway operation log
//! - `reports/<date>-<slug>.md` - rendered reports
//!
//! The hub (shadow working tree) lives **outside** the workspace, as a
//! sibling directory: `<parent(workspace)>/.commitly_hub_<repo_name>`.
//!
//! No code outside this module may compute `.commitly` joins by hand.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::types::AgentKind;

/// Directory name of the local state root.
pub const STATE_DIR: &str = ".commitly";

/// Prefix of the hub directory name.
pub const HUB_PREFIX: &str = ".commitly_hub_";

/// Centralized path routing for a single workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitlyPaths {
    /// Absolute path to the user's working tree.
    workspace: PathBuf,
}

impl CommitlyPaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    /// The user workspace root.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// `<workspace>/.commitly`
    pub fn state_dir(&self) -> PathBuf {
        self.workspace.join(STATE_DIR)
    }

    /// Primary config file at the repository root.
    pub fn config_file(&self) -> PathBuf {
        self.workspace.join("commitly.yaml")
    }

    /// Optional override config inside the state dir.
    pub fn config_override_file(&self) -> PathBuf {
        self.state_dir().join("config.yaml")
    }

    /// Pipeline lock file.
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join("lock")
    }

    /// `.commitly/cache`
    pub fn cache_dir(&self) -> PathBuf {
        self.state_dir().join("cache")
    }

    /// Persisted run context snapshot.
    pub fn run_context_file(&self) -> PathBuf {
        self.cache_dir().join("run_context.json")
    }

    /// Per-agent cache file.
    pub fn agent_cache_file(&self, agent: AgentKind) -> PathBuf {
        self.cache_dir().join(format!("{}.json", agent.name()))
    }

    /// `.commitly/logs`
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// Per-agent log directory.
    pub fn agent_log_dir(&self, agent: AgentKind) -> PathBuf {
        self.logs_dir().join(agent.name())
    }

    /// Timestamped log file for one agent execution.
    pub fn agent_log_file(&self, agent: AgentKind, at: DateTime<Utc>) -> PathBuf {
        self.agent_log_dir(agent).join(log_file_name(at))
    }

    /// Git gateway log directory.
    pub fn git_log_dir(&self) -> PathBuf {
        self.logs_dir().join("git")
    }

    /// Timestamped git gateway log file.
    pub fn git_log_file(&self, at: DateTime<Utc>) -> PathBuf {
        self.git_log_dir().join(log_file_name(at))
    }

    /// `.commitly/reports`
    pub fn reports_dir(&self) -> PathBuf {
        self.state_dir().join("reports")
    }

    /// Report file for a given date and slug.
    pub fn report_file(&self, date: &str, slug: &str) -> PathBuf {
        self.reports_dir().join(format!("{}-{}.md", date, slug))
    }

    /// The hub working tree for this workspace.
    ///
    /// Sibling of the workspace so hub writes can never land inside the
    /// user's tree.
    pub fn hub_dir(&self) -> PathBuf {
        let name = self
            .workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string());
        let parent = self
            .workspace
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        parent.join(format!("{}{}", HUB_PREFIX, name))
    }
}

/// ISO-ish timestamp usable as a file name (colons replaced).
fn log_file_name(at: DateTime<Utc>) -> String {
    format!("{}.log", at.format("%Y-%m-%dT%H-%M-%S%.3fZ"))
}
