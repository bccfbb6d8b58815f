//! agents::clone
//!
//! Produces an isolated snapshot of the user's just-committed state on
//! the hub, ready for validation.

use async_trait::async_trait;
use serde_json::json;

use super::{Agent, AgentError, AgentLog, AgentServices};
use crate::core::context::RunContext;
use crate::core::types::{AgentKind, ErrorKind};
use crate::hub::HubError;

/// Fixed commit message for the clone branch.
const COMMIT_MESSAGE: &str = "commitly[clone]: apply user diff";

pub struct CloneAgent;

#[async_trait]
impl Agent for CloneAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Clone
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
            .expect("clone agent creates a branch");

        log.line("ensuring hub");
        hub.ensure(&ctx.working_branch)
            .await
            .map_err(map_hub_error)?;

        log.line(format!("creating branch {}", branch));
        hub.create_agent_branch(&ctx.working_branch, &branch)
            .await
            .map_err(map_hub_error)?;
        ctx.set_branch(AgentKind::Clone, branch.clone());

        // Revert target for any later failure.
        let anchor = services
            .git
            .rev_parse(hub.hub_path(), "HEAD")
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::HubUnavailable, "cannot read hub HEAD").with_cause(e)
            })?;
        ctx.rollback_anchor = Some(anchor.clone());

        log.line("applying user diff");
        let applied = hub
            .apply_user_diff(&ctx.working_branch)
            .await
            .map_err(map_hub_error)?;

        // The expected change set, as the workspace sees it.
        let upstream = format!("{}/{}", ctx.remote_name, ctx.working_branch);
        let expected = services
            .git
            .diff_name_only(&ctx.workspace_path, &format!("{}..HEAD", upstream))
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::HubUnavailable, "cannot diff workspace").with_cause(e)
            })?;

        // Verification: the hub status must list only expected files.
        let status = services
            .git
            .status_porcelain(hub.hub_path())
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::HubUnavailable, "cannot read hub status").with_cause(e)
            })?;
        let unexpected: Vec<String> = status
            .iter()
            .filter_map(|line| {
                let path = line.get(3..).unwrap_or("").trim();
                if is_hub_auxiliary(path) {
                    return None;
                }
                let known = expected.iter().any(|f| f.to_string_lossy() == path);
                (!known).then(|| path.to_string())
            })
            .collect();
        if !unexpected.is_empty() {
            return Err(AgentError::new(
                ErrorKind::InternalInvariantViolated,
                format!("unexpected files in hub status: {}", unexpected.join(", ")),
            ));
        }

        log.line(format!("committing {} changed files", expected.len()));
        services
            .git
            .commit_all(hub.hub_path(), COMMIT_MESSAGE)
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::HubUnavailable, "cannot commit clone branch")
                    .with_cause(e)
            })?;

        // Publish absolute hub paths for the downstream agents.
        ctx.changed_files = expected
            .iter()
            .map(|rel| hub.hub_path().join(rel))
            .collect();

        Ok(json!({
            "branch": branch,
            "applied": applied,
            "rollback_anchor": anchor,
            "changed_files": ctx.changed_files,
        }))
    }
}

/// The hub carries its own `logs/` and `report/` directories during a
/// run; they are never part of the user's change set.
fn is_hub_auxiliary(path: &str) -> bool {
    path.starts_with("logs/")
        || path.starts_with("report/")
        || path.starts_with(".commitly")
        || path == "logs"
        || path == "report"
}

fn map_hub_error(err: HubError) -> AgentError {
    match err {
        HubError::Unavailable(msg) => AgentError::new(ErrorKind::HubUnavailable, msg),
        HubError::BranchExists(branch) => AgentError::new(
            ErrorKind::InternalInvariantViolated,
            format!("run id collision: branch {} exists", branch),
        ),
        HubError::PatchConflict { rejected } => AgentError::new(
            ErrorKind::PatchConflict,
            format!("user diff did not apply: {}", rejected.join("; ")),
        ),
        HubError::Git(e) => {
            AgentError::new(ErrorKind::HubUnavailable, "git operation failed").with_cause(e)
        }
        HubError::Io(e) => {
            AgentError::new(ErrorKind::HubUnavailable, "hub filesystem error").with_cause(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auxiliary_paths_are_ignored_by_verification() {
        assert!(is_hub_auxiliary("logs/rollback-0a1b2c3d.json"));
        assert!(is_hub_auxiliary("report/weekly.md"));
        assert!(is_hub_auxiliary(".commitly/cache/run_context.json"));
        assert!(!is_hub_auxiliary("app/logs.py"));
        assert!(!is_hub_auxiliary("app/util.py"));
    }

    #[test]
    fn hub_errors_map_to_error_kinds() {
        let err = map_hub_error(HubError::Unavailable("offline".to_string()));
        assert_eq!(err.kind, ErrorKind::HubUnavailable);

        let err = map_hub_error(HubError::PatchConflict {
            rejected: vec!["app.py:12".to_string()],
        });
        assert_eq!(err.kind, ErrorKind::PatchConflict);
        assert!(err.message.contains("app.py:12"));

        let err = map_hub_error(HubError::BranchExists("commitly/clone/x".to_string()));
        assert_eq!(err.kind, ErrorKind::InternalInvariantViolated);
    }
}
