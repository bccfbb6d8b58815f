//! agents::refactor
//!
//! Model-assisted per-file refactoring on its own hub branch.
//!
//! Every changed file is rewritten by the language model under a fixed
//! rule set, formatted, and verified against the project test command.
//! A red suite reverts **just that file** and moves on; the agent never
//! blocks the pipeline on its own errors. No model means a clean no-op.

use async_trait::async_trait;
use serde_json::json;

use super::{run_in_hub, Agent, AgentError, AgentLog, AgentServices};
use crate::core::context::RunContext;
use crate::core::types::{AgentKind, ErrorKind, ErrorRecord};
use crate::process::{run_command, CommandSpec, ExecOptions};

/// Fixed commit message for the refactor branch.
const COMMIT_MESSAGE: &str = "commitly[refactor]: apply model refactorings";

/// Default rule set; `refactoring.rules` overrides it wholesale.
const DEFAULT_RULES: &str = "\
- remove duplicated code by extracting common functions
- wrap risky I/O, network, and database calls in exception handlers with logging
- keep all public signatures unchanged";

pub struct RefactorAgent;

#[async_trait]
impl Agent for RefactorAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Refactor
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        services: &AgentServices,
        log: &mut AgentLog,
    ) -> Result<serde_json::Value, AgentError> {
        let hub = &services.hub;
        let branch = self
            .kind()
            .branch(&ctx.run_id)
            .expect("refactor agent creates a branch");
        let parent = ctx.test_branch.clone().ok_or_else(|| {
            AgentError::new(
                ErrorKind::InternalInvariantViolated,
                "test branch missing from run context",
            )
        })?;

        hub.create_agent_branch(&parent, &branch)
            .await
            .map_err(|e| AgentError::new(ErrorKind::HubUnavailable, e.to_string()))?;
        ctx.set_branch(AgentKind::Refactor, branch.clone());

        let Some(llm) = services.llm.clone() else {
            log.line("language model unavailable, refactor is a no-op");
            return Ok(json!({
                "branch": branch,
                "degraded": ErrorRecord::new(
                    ErrorKind::LlmUnavailable,
                    "language model disabled or unconfigured",
                ),
                "files": [],
                "applied": 0,
            }));
        };

        let rules = services
            .config
            .refactoring
            .rules
            .clone()
            .unwrap_or_else(|| DEFAULT_RULES.to_string());

        let mut files = ctx.changed_files.clone();
        files.sort();

        let mut file_results = Vec::new();
        let mut applied = 0usize;

        for file in &files {
            let display = file
                .strip_prefix(&ctx.hub_path)
                .unwrap_or(file)
                .display()
                .to_string();
            let Ok(before) = std::fs::read_to_string(file) else {
                file_results.push(json!({"file": display, "status": "skipped"}));
                continue;
            };

            let suggestion = match llm.suggest_refactoring(&before, &display, &rules).await {
                Ok(s) if !s.trim().is_empty() && s != before => s,
                Ok(_) => {
                    log.line(format!("{}: no change suggested", display));
                    file_results.push(json!({"file": display, "status": "unchanged"}));
                    continue;
                }
                Err(e) => {
                    log.line(format!("{}: suggestion failed ({}), skipping", display, e));
                    file_results.push(json!({"file": display, "status": "skipped"}));
                    continue;
                }
            };

            std::fs::write(file, &suggestion).map_err(|e| {
                AgentError::new(ErrorKind::InternalInvariantViolated, "cannot write file")
                    .with_cause(e)
            })?;

            format_file(services, ctx, file, log).await;

            // Verify; a red suite reverts just this file.
            let green = match run_in_hub(&ctx.execution.test_command, ctx, log).await {
                Ok(out) => out.success(),
                Err(_) => false,
            };
            if green {
                log.line(format!("{}: refactoring applied", display));
                file_results.push(json!({"file": display, "status": "applied"}));
                applied += 1;
            } else {
                std::fs::write(file, &before).map_err(|e| {
                    AgentError::new(
                        ErrorKind::InternalInvariantViolated,
                        "revert failed after red tests",
                    )
                    .with_cause(e)
                })?;
                log.line(format!("{}: tests failed, reverted", display));
                file_results.push(json!({"file": display, "status": "reverted"}));
            }
        }

        if applied > 0 {
            services
                .git
                .commit_all(hub.hub_path(), COMMIT_MESSAGE)
                .await
                .map_err(|e| {
                    AgentError::new(ErrorKind::HubUnavailable, "cannot commit refactor branch")
                        .with_cause(e)
                })?;
        } else {
            log.line("no refactorings survived, skipping commit");
        }

        Ok(json!({
            "branch": branch,
            "files": file_results,
            "applied": applied,
        }))
    }
}

/// Run the configured formatters over one file. Best effort: missing or
/// failing formatters are logged and ignored.
async fn format_file(
    services: &AgentServices,
    ctx: &RunContext,
    file: &std::path::Path,
    log: &AgentLog,
) {
    for formatter in &services.config.refactoring.formatters {
        let Ok(mut spec) = CommandSpec::parse(formatter) else {
            continue;
        };
        spec.args.push(file.to_string_lossy().into_owned());
        let opts = ExecOptions::new(
            &ctx.hub_path,
            std::time::Duration::from_secs(ctx.execution.timeout_secs),
        )
        .with_log_file(log.path());
        let _ = run_command(&spec, &opts).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_cover_the_fixed_rule_set() {
        assert!(DEFAULT_RULES.contains("duplicated code"));
        assert!(DEFAULT_RULES.contains("exception handlers"));
        assert!(DEFAULT_RULES.contains("public signatures unchanged"));
    }
}
