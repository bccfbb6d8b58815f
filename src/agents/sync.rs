//! agents::sync
//!
//! The single approval gate: summarize the run, ask the human, and on
//! yes publish the refactor branch through the user's workspace.
//!
//! Declining is not a failure. The hub stays on the refactor branch for
//! manual inspection, the pipeline continues to Notify/Report, and the
//! run terminates as `approved_no_push`.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{Agent, AgentError, AgentLog, AgentServices};
use crate::core::context::RunContext;
use crate::core::types::{AgentKind, ErrorKind};

/// Push attempts before giving up.
const PUSH_ATTEMPTS: u32 = 3;

/// Backoff base between push attempts.
const PUSH_BACKOFF: Duration = Duration::from_millis(750);

pub struct SyncAgent;

#[async_trait]
impl Agent for SyncAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Sync
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        services: &AgentServices,
        log: &mut AgentLog,
    ) -> Result<serde_json::Value, AgentError> {
        let refactor_branch = ctx.refactor_branch.clone().ok_or_else(|| {
            AgentError::new(
                ErrorKind::InternalInvariantViolated,
                "refactor branch missing from run context",
            )
        })?;

        let summary = build_summary(ctx, services).await;
        log.line("requesting approval");

        let approved = match services.approval.confirm(&summary) {
            Ok(answer) => answer,
            Err(e) => {
                // An unreadable gate gets the safe answer.
                warn!(error = %e, "approval source failed, declining");
                log.line(format!("approval source failed ({}), declining", e));
                false
            }
        };

        if !approved {
            log.line("declined, hub left on refactor branch for inspection");
            return Ok(json!({
                "approved": false,
                "pushed": false,
                "summary": summary,
            }));
        }

        // Bring the workspace branch to the refactor tip. The hub's
        // history replays the user diff as pipeline commits, so a plain
        // fast-forward only succeeds on no-op runs; otherwise the branch
        // is moved to the fetched tip.
        let hub_path = services.hub.hub_path().to_string_lossy().into_owned();
        services
            .git
            .git(
                &ctx.workspace_path,
                &["fetch", hub_path.as_str(), refactor_branch.as_str()],
            )
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::PushFailed, "cannot fetch refactor branch")
                    .with_cause(e)
            })?;
        if services
            .git
            .merge_ff_only(&ctx.workspace_path, "FETCH_HEAD")
            .await
            .is_err()
        {
            log.line("fast-forward not possible, moving branch to fetched tip");
            services
                .git
                .reset_hard(&ctx.workspace_path, "FETCH_HEAD")
                .await
                .map_err(|e| {
                    AgentError::new(ErrorKind::PushFailed, "cannot update working branch")
                        .with_cause(e)
                })?;
        }

        // Push with bounded retries on transient classes.
        let mut attempt = 0;
        loop {
            match services
                .git
                .push(&ctx.workspace_path, &ctx.remote_name, &ctx.working_branch)
                .await
            {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt + 1 < PUSH_ATTEMPTS => {
                    attempt += 1;
                    log.line(format!("push attempt {} failed: {}", attempt, e));
                    tokio::time::sleep(PUSH_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => {
                    return Err(AgentError::new(
                        ErrorKind::PushFailed,
                        format!("push failed after {} attempts", attempt + 1),
                    )
                    .with_cause(e)
                    .with_hint(format!(
                        "push manually with: git push {} {}",
                        ctx.remote_name, ctx.working_branch
                    )));
                }
            }
        }
        log.line("pushed");

        // Derivative branches are only deleted after a successful push.
        let branches = ctx.derivative_branches();
        services
            .git
            .checkout(services.hub.hub_path(), &ctx.working_branch)
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::HubUnavailable, "cannot leave refactor branch")
                    .with_cause(e)
            })?;
        services.hub.cleanup(&branches).await.map_err(|e| {
            AgentError::new(ErrorKind::HubUnavailable, "branch cleanup failed").with_cause(e)
        })?;
        log.line(format!("deleted {} derivative branches", branches.len()));

        Ok(json!({
            "approved": true,
            "pushed": true,
            "deleted_branches": branches,
            "summary": summary,
        }))
    }
}

/// Human-readable run summary shown at the gate.
async fn build_summary(ctx: &RunContext, services: &AgentServices) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "commitly run {} on {}", ctx.run_id, ctx.working_branch);

    for commit in &ctx.user_commits {
        let _ = writeln!(s, "  commit: {}", commit.message);
    }

    if let Some(refactor_branch) = &ctx.refactor_branch {
        let range = format!("{}..{}", ctx.working_branch, refactor_branch);
        if let Ok(stats) = services.git.diff_numstat(services.hub.hub_path(), &range).await {
            let _ = writeln!(s, "files changed: {}", stats.len());
            for stat in stats {
                let _ = writeln!(
                    s,
                    "  {} (+{} -{})",
                    stat.path.display(),
                    stat.added,
                    stat.deleted
                );
            }
        }
    }

    let test_data = &ctx.outcome(AgentKind::Test).data;
    if let Some(ms) = test_data.get("test_elapsed_ms").and_then(|v| v.as_u64()) {
        let _ = writeln!(s, "tests: green ({}ms)", ms);
    }
    if let Some(sites) = test_data.get("sites").and_then(|v| v.as_array()) {
        for site in sites {
            if site["outcome"] == "optimized" {
                let _ = writeln!(
                    s,
                    "query optimized: {} cost {:.1} -> {:.1} ({:.1}%)",
                    site["file"].as_str().unwrap_or("?"),
                    site["original_cost"].as_f64().unwrap_or(0.0),
                    site["chosen_cost"].as_f64().unwrap_or(0.0),
                    site["improvement_rate"].as_f64().unwrap_or(0.0),
                );
            }
        }
    }

    let refactor_data = &ctx.outcome(AgentKind::Refactor).data;
    if let Some(applied) = refactor_data.get("applied").and_then(|v| v.as_u64()) {
        if applied > 0 {
            let _ = writeln!(s, "refactored files: {}", applied);
        }
    }

    s
}
