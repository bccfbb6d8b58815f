//! pipeline
//!
//! The orchestrator: runs the seven agents in fixed order and
//! translates their outcomes into the run's terminal status.
//!
//! # Lifecycle
//!
//! ```text
//! lock -> Clone -> Code -> Test -> Refactor -> Sync -> Notify -> Report
//!           \________ blocking: failure triggers rollback ________/
//!                                                \__ non-blocking __/
//! ```
//!
//! # Invariants
//!
//! - One run per repository: the pipeline lock is held for the whole run
//!   and released on every exit path (RAII)
//! - No agent starts before its predecessor's outcome is persisted
//! - Blocking failure aborts via the rollback engine; non-blocking
//!   failure is recorded and the terminal status is not downgraded
//! - Sync is the only agent that solicits human input; a decline
//!   terminates the run as `approved_no_push` after Notify/Report

pub mod rollback;

pub use rollback::{RollbackEngine, RollbackReport};

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::agents::{
    run_agent, Agent, AgentServices, CloneAgent, CodeAgent, NotifyAgent, RefactorAgent,
    ReportAgent, SyncAgent, TestAgent,
};
use crate::core::context::{ExecutionProfile, PipelineRun, RunContext};
use crate::core::lock::{LockError, PipelineLock};
use crate::core::types::{
    AgentKind, AgentStatus, ErrorKind, ErrorRecord, RepoHandle, RunId, RunStatus,
};

/// Errors that prevent a run from starting at all.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another run holds the pipeline lock (exit code 4).
    #[error("another pipeline run is active (lock held)")]
    LockHeld,

    /// Lock infrastructure failure.
    #[error("pipeline lock error: {0}")]
    Lock(#[from] LockError),
}

/// The pipeline orchestrator.
pub struct Pipeline {
    services: AgentServices,
}

impl Pipeline {
    pub fn new(services: AgentServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    /// Run the full pipeline for one recorded commit.
    ///
    /// Preconditions: the commits are already recorded in the
    /// workspace. Postconditions: the run record and context are
    /// persisted, the hub matches the terminal status (cleaned on
    /// success, last successful branch on failure), and the lock is
    /// released.
    pub async fn run(&self, repo: &RepoHandle) -> Result<PipelineRun, PipelineError> {
        let services = &self.services;

        let mut lock = match PipelineLock::acquire(&services.paths.lock_file()) {
            Ok(lock) => lock,
            Err(LockError::Held) => return Err(PipelineError::LockHeld),
            Err(e) => return Err(e.into()),
        };

        let run_id = RunId::generate();
        let started_at = Utc::now();
        info!(run = %run_id, branch = %repo.working_branch, "pipeline starting");

        let mut ctx = self.fresh_context(&run_id, repo);
        let _ = ctx.save(&services.paths.run_context_file());

        let agents: [Box<dyn Agent>; 7] = [
            Box::new(CloneAgent),
            Box::new(CodeAgent),
            Box::new(TestAgent),
            Box::new(RefactorAgent),
            Box::new(SyncAgent),
            Box::new(NotifyAgent),
            Box::new(ReportAgent),
        ];

        let mut aborted_at: Option<AgentKind> = None;
        let mut cancelled = false;

        for agent in &agents {
            let kind = agent.kind();

            // Cooperative cancellation, observed at agent boundaries.
            if services.cancel.is_cancelled() {
                ctx.outcome_mut(kind).status = AgentStatus::Failed;
                ctx.outcome_mut(kind).error = Some(ErrorRecord::new(
                    ErrorKind::Cancelled,
                    "pipeline cancelled by user",
                ));
                cancelled = true;
                aborted_at = Some(kind);
                break;
            }

            let status = run_agent(agent.as_ref(), &mut ctx, services).await;

            if status == AgentStatus::Failed {
                if kind.is_blocking() {
                    aborted_at = Some(kind);
                    cancelled = ctx
                        .outcome(kind)
                        .error
                        .as_ref()
                        .map(|e| e.kind == ErrorKind::Cancelled)
                        .unwrap_or(false);
                    break;
                }
                // Open question resolved: non-blocking failures log at
                // warn, uniformly.
                warn!(agent = %kind, "non-blocking agent failed, continuing");
            }
        }

        let status = if let Some(failed) = aborted_at {
            let engine = RollbackEngine {
                hub: &services.hub,
                paths: &services.paths,
                cleanup_hub: services.config.pipeline.cleanup_hub_on_failure,
            };
            let report = engine.on_failure(&mut ctx, failed).await;
            if !report.is_clean() {
                warn!(errors = ?report.errors, "rollback finished with errors");
            }
            self.mark_downstream_blocked(&mut ctx, failed);
            if cancelled {
                RunStatus::Aborted
            } else {
                RunStatus::Failed
            }
        } else if self.sync_declined(&ctx) {
            RunStatus::ApprovedNoPush
        } else {
            RunStatus::Succeeded
        };

        let run = PipelineRun {
            run_id: run_id.clone(),
            started_at,
            ended_at: Some(Utc::now()),
            status,
            outcomes: ctx.outcomes.clone(),
        };
        let _ = ctx.save(&services.paths.run_context_file());
        self.persist_run(&run);

        lock.release();
        info!(run = %run_id, %status, "pipeline finished");
        Ok(run)
    }

    fn fresh_context(&self, run_id: &RunId, repo: &RepoHandle) -> RunContext {
        let config = &self.services.config;
        RunContext::new(
            run_id.clone(),
            repo.repo_name(),
            repo.workspace_path.clone(),
            self.services.paths.hub_dir(),
            repo.remote_name.clone(),
            repo.working_branch.clone(),
            repo.user_commits.clone(),
            ExecutionProfile {
                run_command: config.execution_command().to_string(),
                test_command: config.test_command().to_string(),
                timeout_secs: config.execution.timeout,
                memory_limit_mb: config.execution.memory_limit_mb,
                interpreter: config.execution.python_bin.clone().map(Into::into),
            },
        )
    }

    /// Agents that never got to run stay visibly blocked in the record.
    fn mark_downstream_blocked(&self, ctx: &mut RunContext, failed: AgentKind) {
        let failed_pos = AgentKind::ORDER
            .iter()
            .position(|k| *k == failed)
            .unwrap_or(0);
        for kind in &AgentKind::ORDER[failed_pos + 1..] {
            let outcome = ctx.outcome_mut(*kind);
            if outcome.status == AgentStatus::Pending {
                outcome.status = AgentStatus::Blocked;
            }
        }
    }

    fn sync_declined(&self, ctx: &RunContext) -> bool {
        let outcome = ctx.outcome(AgentKind::Sync);
        outcome.status == AgentStatus::Succeeded
            && outcome.data.get("approved") == Some(&serde_json::Value::Bool(false))
    }

    /// Persist the run record beside the agent caches.
    fn persist_run(&self, run: &PipelineRun) {
        let path = self.services.paths.cache_dir().join("run.json");
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(run) {
            let _ = std::fs::write(path, json);
        }
    }
}

/// Load the last persisted run record, if any.
pub fn last_run(paths: &crate::core::CommitlyPaths) -> Option<PipelineRun> {
    let path = paths.cache_dir().join("run.json");
    let json = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&json).ok()
}
