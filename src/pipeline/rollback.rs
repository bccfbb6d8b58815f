//! pipeline::rollback
//!
//! Failure recovery for the hub.
//!
//! Triggered on any blocking-agent failure (or cancellation). Rewinds
//! the hub to the last successful agent branch, deletes the branches
//! created by or after the failing agent, and persists the error record
//! to both the hub and local log directories. The engine never retries
//! the failed agent; recovery is user-initiated via a fresh commit.
//!
//! Partial rollback is possible (e.g. the hub vanished mid-run); every
//! step's failure is recorded rather than raised so the pipeline can
//! still finalize the run record.

use serde_json::json;
use tracing::{error, info};

use crate::core::context::RunContext;
use crate::core::types::AgentKind;
use crate::core::CommitlyPaths;
use crate::hub::HubManager;

/// What the rollback actually did.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Branch the hub was left on, when the reset succeeded.
    pub reset_to: Option<String>,
    /// Derivative branches deleted.
    pub deleted_branches: Vec<String>,
    /// Whether the hub directory was removed entirely.
    pub hub_removed: bool,
    /// Steps that could not be completed.
    pub errors: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The rollback engine.
pub struct RollbackEngine<'a> {
    pub hub: &'a HubManager,
    pub paths: &'a CommitlyPaths,
    /// `pipeline.cleanup_hub_on_failure`
    pub cleanup_hub: bool,
}

impl<'a> RollbackEngine<'a> {
    /// Run the rollback for a failure in `failed`.
    pub async fn on_failure(&self, ctx: &mut RunContext, failed: AgentKind) -> RollbackReport {
        let mut report = RollbackReport::default();

        // Propagate the failing agent's error into the run context.
        ctx.error = ctx.outcome(failed).error.clone();

        let target = ctx
            .last_successful_branch(failed)
            .unwrap_or_else(|| ctx.working_branch.clone());

        if self.hub.hub_path().join(".git").exists() {
            match self.hub.reset_to(&target).await {
                Ok(()) => {
                    info!(branch = %target, "hub reset");
                    report.reset_to = Some(target);
                }
                Err(e) => report.errors.push(format!("reset to {} failed: {}", target, e)),
            }

            let doomed = ctx.branches_from(failed);
            match self.hub.cleanup(&doomed).await {
                Ok(()) => report.deleted_branches = doomed,
                Err(e) => report.errors.push(format!("branch cleanup failed: {}", e)),
            }
        } else {
            report
                .errors
                .push("hub missing, nothing to reset".to_string());
        }

        self.persist_error(ctx, failed, &mut report);

        if self.cleanup_hub {
            match self.hub.remove() {
                Ok(()) => report.hub_removed = true,
                Err(e) => report.errors.push(format!("hub removal failed: {}", e)),
            }
        }

        if report.is_clean() {
            info!(agent = %failed, "rollback complete");
        } else {
            error!(agent = %failed, errors = ?report.errors, "rollback incomplete");
        }
        report
    }

    /// Error record to both the hub log directory and the local one.
    fn persist_error(&self, ctx: &RunContext, failed: AgentKind, report: &mut RollbackReport) {
        let payload = json!({
            "run_id": ctx.run_id,
            "agent": failed.name(),
            "error": ctx.error,
        });
        let pretty = serde_json::to_string_pretty(&payload).unwrap_or_default();
        let name = format!("rollback-{}.json", ctx.run_id);

        for dir in [self.hub.hub_path().join("logs"), self.paths.logs_dir()] {
            if let Err(e) = std::fs::create_dir_all(&dir)
                .and_then(|_| std::fs::write(dir.join(&name), &pretty))
            {
                report
                    .errors
                    .push(format!("cannot persist error to {}: {}", dir.display(), e));
            }
        }
    }
}
