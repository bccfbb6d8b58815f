//! agents
//!
//! The seven pipeline agents and the harness that runs them.
//!
//! # Agent contract
//!
//! An agent implements [`Agent`]: a kind and an `execute` that reads and
//! mutates the run context, returning a structured output value or an
//! [`AgentError`]. Agents never panic across the boundary and never see
//! the orchestrator; the harness ([`run_agent`]) wraps every execution
//! with timestamps, an agent-scoped log sink, error capture, cache
//! persistence, and run-context reserialization. Failure reaches the
//! orchestrator as a returned outcome, never as an unwind.

mod clone;
mod code;
mod notify_agent;
mod refactor;
mod report_agent;
mod sync;

pub use clone::CloneAgent;
pub use code::CodeAgent;
pub use notify_agent::NotifyAgent;
pub use refactor::RefactorAgent;
pub use report_agent::ReportAgent;
pub use sync::SyncAgent;
pub use test::TestAgent;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::context::{AgentCacheFile, RunContext};
use crate::core::types::{AgentKind, AgentStatus, ErrorKind, ErrorRecord};
use crate::core::CommitlyPaths;
use crate::git::GitGateway;
use crate::hub::HubManager;
use crate::llm::LanguageModel;
use crate::notify::Notifier;
use crate::ui::ApprovalSource;

/// Failure returned by an agent.
#[derive(Debug, Clone)]
pub struct AgentError {
    pub kind: ErrorKind,
    pub message: String,
    pub cause: Option<String>,
    pub hint: Option<String>,
}

impl AgentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            hint: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn record(&self) -> ErrorRecord {
        let mut record = ErrorRecord::new(self.kind, self.message.clone());
        record.cause = self.cause.clone();
        record.hint = self.hint.clone();
        record
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.record(), f)
    }
}

/// Cooperative cancellation flag, set by the interrupt handler and
/// observed at agent boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators shared by every agent.
pub struct AgentServices {
    pub paths: CommitlyPaths,
    pub config: Config,
    pub git: GitGateway,
    pub hub: HubManager,
    /// Absent when disabled or unconfigured; agents degrade.
    pub llm: Option<Arc<dyn LanguageModel>>,
    /// Absent when unconfigured; the Notify agent degrades.
    pub notifier: Option<Arc<dyn Notifier>>,
    pub approval: Arc<dyn ApprovalSource>,
    pub cancel: CancellationFlag,
}

/// Append-only, timestamped log sink scoped to one agent execution.
///
/// Subprocess output shares the same file (the process harness appends),
/// so one log tells the whole story of the agent's run.
pub struct AgentLog {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl AgentLog {
    pub fn open(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok();
        Self {
            path: path.to_path_buf(),
            file,
        }
    }

    /// Write one timestamped line.
    pub fn line(&mut self, message: impl std::fmt::Display) {
        if let Some(file) = self.file.as_mut() {
            let _ = writeln!(file, "{} {}", Utc::now().format("%H:%M:%S%.3f"), message);
        }
    }

    /// Path of the log file, for outcome records and process sinks.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run a shell-quoted command string inside the hub with the run's
/// environment overlay, appending output to the agent log.
pub(crate) async fn run_in_hub(
    command: &str,
    ctx: &RunContext,
    log: &AgentLog,
) -> Result<crate::process::ExecOutput, crate::process::ExecError> {
    let spec = crate::process::CommandSpec::parse(command)?;
    let env = crate::process::hub_env(
        ctx.env_file_path.as_deref(),
        ctx.execution.interpreter.as_deref(),
    );
    let opts = crate::process::ExecOptions::new(
        &ctx.hub_path,
        std::time::Duration::from_secs(ctx.execution.timeout_secs),
    )
    .with_env(env)
    .with_log_file(log.path());
    crate::process::run_command(&spec, &opts).await
}

/// A pipeline agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn execute(
        &self,
        ctx: &mut RunContext,
        services: &AgentServices,
        log: &mut AgentLog,
    ) -> Result<serde_json::Value, AgentError>;
}

/// Run one agent under the harness and return its final status.
///
/// The harness records start/end timestamps and measured wall-clock,
/// captures any error into the outcome map, writes the agent cache file,
/// and reserializes the run context so every agent boundary is
/// inspectable on disk.
pub async fn run_agent(
    agent: &dyn Agent,
    ctx: &mut RunContext,
    services: &AgentServices,
) -> AgentStatus {
    let kind = agent.kind();
    let started = Utc::now();
    let log_path = services.paths.agent_log_file(kind, started);
    let mut log = AgentLog::open(&log_path);

    {
        let outcome = ctx.outcome_mut(kind);
        outcome.status = AgentStatus::Running;
        outcome.started_at = Some(started);
        outcome.log_path = Some(log_path.clone());
    }
    log.line(format!("agent {} starting (run {})", kind, ctx.run_id));
    info!(agent = %kind, run = %ctx.run_id, "agent starting");

    let result = agent.execute(ctx, services, &mut log).await;

    let ended = Utc::now();
    let elapsed_ms = (ended - started).num_milliseconds().max(0) as u64;

    let status = {
        let outcome = ctx.outcome_mut(kind);
        outcome.ended_at = Some(ended);
        outcome.elapsed_ms = Some(elapsed_ms);
        match result {
            Ok(data) => {
                outcome.status = AgentStatus::Succeeded;
                outcome.data = data;
            }
            Err(err) => {
                outcome.status = AgentStatus::Failed;
                outcome.error = Some(err.record());
            }
        }
        outcome.status
    };

    match status {
        AgentStatus::Succeeded => log.line(format!("agent {} succeeded in {}ms", kind, elapsed_ms)),
        _ => {
            if let Some(err) = &ctx.outcome(kind).error {
                log.line(format!("agent {} failed: {}", kind, err));
            }
            warn!(agent = %kind, "agent failed");
        }
    }

    let cache = AgentCacheFile {
        run_id: ctx.run_id.clone(),
        agent_name: kind.name().to_string(),
        branch: ctx.outcome(kind).branch.clone(),
        status,
        started_at: Some(started),
        ended_at: Some(ended),
        data: ctx.outcome(kind).data.clone(),
    };
    if let Err(e) = cache.save(&services.paths.agent_cache_file(kind)) {
        warn!(agent = %kind, error = %e, "failed to write agent cache");
    }
    if let Err(e) = ctx.save(&services.paths.run_context_file()) {
        warn!(error = %e, "failed to persist run context");
    }

    status
}
