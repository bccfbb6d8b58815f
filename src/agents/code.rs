//! agents::code
//!
//! Validates the snapshot syntactically and at runtime, and mines
//! embedded SQL sites for the optimizer.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{Agent, AgentError, AgentLog, AgentServices};
use crate::core::context::RunContext;
use crate::core::types::{AgentKind, ErrorKind, ErrorRecord};
use crate::optimizer::extract;
use crate::process::{hub_env, run_command, CommandSpec, ExecError, ExecOptions};

/// Fixed commit message for the code branch.
const COMMIT_MESSAGE: &str = "commitly[code]: validated snapshot";

pub struct CodeAgent;

#[async_trait]
impl Agent for CodeAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Code
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        services: &AgentServices,
        log: &mut AgentLog,
    ) -> Result<serde_json::Value, AgentError> {
        let hub = &services.hub;
        let hub_path = hub.hub_path().to_path_buf();
        let branch = self
            .kind()
            .branch(&ctx.run_id)
            .expect("code agent creates a branch");
        let parent = ctx
            .clone_branch
            .clone()
            .ok_or_else(|| missing_branch("clone"))?;

        hub.create_agent_branch(&parent, &branch)
            .await
            .map_err(|e| AgentError::new(ErrorKind::HubUnavailable, e.to_string()))?;
        ctx.set_branch(AgentKind::Code, branch.clone());

        // Environment check: a configured interpreter must exist.
        let interpreter = resolve_interpreter(ctx)?;
        let mut interpreter_version = None;
        if let Some(path) = &interpreter {
            interpreter_version = probe_version(path, &hub_path).await;
            log.line(format!(
                "interpreter: {} ({})",
                path.display(),
                interpreter_version.as_deref().unwrap_or("version unknown")
            ));
        }
        let env_file = hub_path.join(".env");
        ctx.env_file_path = env_file.exists().then(|| env_file.clone());
        let env = hub_env(ctx.env_file_path.as_deref(), interpreter.as_deref());

        let timeout = Duration::from_secs(ctx.execution.timeout_secs);

        // Static analysis: missing tools are a soft skip, findings are
        // soft warnings. Neither fails the pipeline; both land in the
        // outcome as classified error records.
        let mut warnings: Vec<ErrorRecord> = Vec::new();
        let mut linter_results = Vec::new();
        for linter in &services.config.analysis.linters {
            let spec = match CommandSpec::parse(linter) {
                Ok(spec) => spec,
                Err(e) => {
                    warnings.push(
                        ErrorRecord::new(
                            ErrorKind::StaticCheckFailed,
                            format!("unparseable linter command {:?}", linter),
                        )
                        .with_cause(e.to_string()),
                    );
                    continue;
                }
            };
            let opts = ExecOptions::new(&hub_path, timeout)
                .with_env(env.clone())
                .with_log_file(log.path());
            match run_command(&spec, &opts).await {
                Ok(out) => {
                    if !out.success() {
                        warnings.push(ErrorRecord::new(
                            ErrorKind::StaticCheckFailed,
                            format!("static check failed: {}", linter),
                        ));
                    }
                    linter_results.push(json!({"command": linter, "code": out.code}));
                }
                Err(ExecError::SpawnFailed { program, .. }) => {
                    log.line(format!("linter {} not installed, skipping", program));
                    warnings.push(ErrorRecord::new(
                        ErrorKind::StaticCheckFailed,
                        format!("linter not installed: {}", program),
                    ));
                }
                Err(e) => warnings.push(
                    ErrorRecord::new(
                        ErrorKind::StaticCheckFailed,
                        format!("linter failed to run: {}", linter),
                    )
                    .with_cause(e.to_string()),
                ),
            }
        }

        // Dynamic execution of the primary command.
        let spec = CommandSpec::parse(&ctx.execution.run_command).map_err(|e| {
            AgentError::new(ErrorKind::RuntimeFailed, "unparseable execution command")
                .with_cause(e)
        })?;
        log.line(format!("running: {}", spec.display()));
        let opts = ExecOptions::new(&hub_path, timeout)
            .with_env(env)
            .with_log_file(log.path());
        let run = match run_command(&spec, &opts).await {
            Ok(out) if out.success() => out,
            Ok(out) => {
                return Err(AgentError::new(
                    ErrorKind::RuntimeFailed,
                    format!("primary command exited {}", out.code),
                )
                .with_cause(out.stderr.trim_end().to_string()))
            }
            Err(ExecError::Timeout { timeout_secs, .. }) => {
                return Err(AgentError::new(
                    ErrorKind::RuntimeFailed,
                    format!("primary command timed out after {}s", timeout_secs),
                ))
            }
            Err(ExecError::SpawnFailed { program, message }) => {
                return Err(AgentError::new(
                    ErrorKind::EnvironmentBlocked,
                    format!("cannot run {}: {}", program, message),
                ))
            }
            Err(e) => {
                return Err(
                    AgentError::new(ErrorKind::RuntimeFailed, "primary command failed")
                        .with_cause(e),
                )
            }
        };

        // Query extraction over the changed files.
        let sinks = &services.config.optimizer.sinks;
        let dialect = services
            .config
            .database
            .as_ref()
            .map(|db| db.dialect.clone())
            .unwrap_or_else(|| "postgresql".to_string());
        let mut sites = Vec::new();
        let mut files = ctx.changed_files.clone();
        files.sort();
        for file in &files {
            let Ok(content) = std::fs::read_to_string(file) else {
                continue;
            };
            sites.extend(extract::extract_sites(file, &content, sinks, &dialect));
        }
        log.line(format!("extracted {} embedded query sites", sites.len()));
        ctx.has_embedded_queries = !sites.is_empty();
        ctx.embedded_query_sites = sites;

        services
            .git
            .commit_all(&hub_path, COMMIT_MESSAGE)
            .await
            .map_err(|e| {
                AgentError::new(ErrorKind::HubUnavailable, "cannot commit code branch")
                    .with_cause(e)
            })?;

        Ok(json!({
            "branch": branch,
            "interpreter": interpreter,
            "interpreter_version": interpreter_version,
            "linters": linter_results,
            "warnings": warnings,
            "run_elapsed_ms": run.elapsed.as_millis() as u64,
            "embedded_query_sites": ctx.embedded_query_sites.len(),
        }))
    }
}

/// First line of `<interpreter> --version`, best effort.
async fn probe_version(interpreter: &std::path::Path, cwd: &std::path::Path) -> Option<String> {
    let spec = CommandSpec {
        program: interpreter.to_string_lossy().into_owned(),
        args: vec!["--version".to_string()],
    };
    let opts = ExecOptions::new(cwd, Duration::from_secs(15));
    let out = run_command(&spec, &opts).await.ok().filter(|o| o.success())?;
    // Some interpreters print the version on stderr.
    let combined = if out.stdout.trim().is_empty() {
        out.stderr
    } else {
        out.stdout
    };
    combined.lines().next().map(|l| l.trim().to_string())
}

/// The configured interpreter must exist; an unconfigured one is probed
/// best-effort.
fn resolve_interpreter(ctx: &mut RunContext) -> Result<Option<PathBuf>, AgentError> {
    if let Some(configured) = &ctx.execution.interpreter {
        let found = if configured.is_absolute() {
            configured.exists().then(|| configured.clone())
        } else {
            which::which(configured).ok()
        };
        return match found {
            Some(path) => {
                ctx.execution.interpreter = Some(path.clone());
                Ok(Some(path))
            }
            None => Err(AgentError::new(
                ErrorKind::EnvironmentBlocked,
                format!("configured interpreter not found: {}", configured.display()),
            )),
        };
    }

    let detected = which::which("python3").or_else(|_| which::which("python")).ok();
    if let Some(path) = &detected {
        ctx.execution.interpreter = Some(path.clone());
    }
    Ok(detected)
}

fn missing_branch(name: &str) -> AgentError {
    AgentError::new(
        ErrorKind::InternalInvariantViolated,
        format!("{} branch missing from run context", name),
    )
}
