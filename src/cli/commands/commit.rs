//! cli::commands::commit
//!
//! Record the commit in the user repo, then run the pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::agents::{AgentServices, CancellationFlag};
use crate::cli::args::Cli;
use crate::cli::{EXIT_CONFIG, EXIT_LOCK_HELD};
use crate::core::config::Config;
use crate::core::types::{AgentStatus, ErrorKind, ErrorRecord, RepoHandle};
use crate::core::CommitlyPaths;
use crate::git::{GitError, GitGateway};
use crate::hub::HubManager;
use crate::llm;
use crate::notify::{Notifier, SlackNotifier};
use crate::pipeline::{Pipeline, PipelineError};
use crate::ui::{
    output, ApprovalSource, FileGate, InteractivePrompt, ScriptedApproval, Verbosity,
};

/// Run the commit command.
///
/// Synchronous wrapper that creates the tokio runtime for the async
/// pipeline underneath.
pub fn commit(workspace: &Path, message: &str, cli: &Cli, verbosity: Verbosity) -> Result<i32> {
    let paths = CommitlyPaths::new(workspace);

    let config = match Config::load(&paths.config_file(), &paths.config_override_file()) {
        Ok(config) => config,
        Err(e) => {
            output::error(ErrorRecord::new(
                ErrorKind::ConfigurationMissing,
                e.to_string(),
            ));
            return Ok(EXIT_CONFIG);
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(commit_async(workspace, message, cli, verbosity, paths, config))
}

async fn commit_async(
    workspace: &Path,
    message: &str,
    cli: &Cli,
    verbosity: Verbosity,
    paths: CommitlyPaths,
    config: Config,
) -> Result<i32> {
    let git = GitGateway::new(&paths.git_log_dir());

    if git.git(workspace, &["rev-parse", "--git-dir"]).await.is_err() {
        bail!("not a git repository: {}", workspace.display());
    }

    // Record the commit. An empty working tree is not an error; the
    // pipeline then runs as a no-op past Clone.
    git.git(workspace, &["add", "-A"]).await?;
    match git.git(workspace, &["commit", "-m", message]).await {
        Ok(_) => {}
        Err(GitError::Exit { code: 1, .. }) => {
            output::warn("nothing to commit, validating existing state", verbosity);
        }
        Err(e) => return Err(e.into()),
    }

    let working_branch = git.current_branch(workspace).await?;
    let remote = config.git.remote.clone();
    let upstream = format!("{}/{}", remote, working_branch);
    let user_commits = git
        .commits_in_range(workspace, &format!("{}..HEAD", upstream))
        .await
        .unwrap_or_default();

    let repo = RepoHandle {
        workspace_path: workspace.to_path_buf(),
        remote_name: remote.clone(),
        working_branch,
        user_commits,
    };

    // Collaborators. Model and notifier are optional: agents degrade.
    let llm_handle = match llm::from_config(&config.llm) {
        Ok(handle) => Some(handle),
        Err(e) => {
            output::warn(format!("language model unavailable: {}", e), verbosity);
            None
        }
    };
    let notifier = config.notify.as_ref().and_then(|n| {
        n.token.as_ref().map(|token| {
            Arc::new(SlackNotifier::new(
                token.clone(),
                n.channel.clone(),
                n.base_url.clone(),
            )) as Arc<dyn Notifier>
        })
    });
    let approval = approval_source(cli);

    let cancel = CancellationFlag::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let hub = HubManager::new(git.clone(), workspace, paths.hub_dir(), &remote);
    let pipeline = Pipeline::new(AgentServices {
        paths: paths.clone(),
        config,
        git,
        hub,
        llm: llm_handle,
        notifier,
        approval,
        cancel,
    });

    match pipeline.run(&repo).await {
        Ok(run) => {
            print_outcome(&run, &paths, verbosity);
            Ok(run.status.exit_code())
        }
        Err(PipelineError::LockHeld) => {
            output::error(ErrorRecord::new(
                ErrorKind::LockHeld,
                "another pipeline run is active",
            ));
            Ok(EXIT_LOCK_HELD)
        }
        Err(e) => Err(e.into()),
    }
}

fn approval_source(cli: &Cli) -> Arc<dyn ApprovalSource> {
    if cli.yes {
        Arc::new(ScriptedApproval(true))
    } else if cli.no {
        Arc::new(ScriptedApproval(false))
    } else if let Some(path) = &cli.approval_file {
        Arc::new(FileGate::new(path))
    } else {
        Arc::new(InteractivePrompt)
    }
}

fn print_outcome(
    run: &crate::core::context::PipelineRun,
    paths: &CommitlyPaths,
    verbosity: Verbosity,
) {
    for (agent, outcome) in &run.outcomes {
        output::print(
            output::agent_line(agent, outcome.status, outcome.elapsed_ms),
            verbosity,
        );
    }
    output::print(
        format!("run {} {} (exit {})", run.run_id, run.status, run.status.exit_code()),
        verbosity,
    );

    if let Some((agent, outcome)) = run
        .outcomes
        .iter()
        .find(|(_, o)| o.status == AgentStatus::Failed && o.error.is_some())
    {
        if let Some(error) = &outcome.error {
            output::error(format!("{} failed: {}", agent, error));
            if let Some(hint) = &error.hint {
                output::error(format!("hint: {}", hint));
            }
        }
        if let Some(log) = &outcome.log_path {
            output::error(format!("log: {}", log.display()));
        }
        output::error(format!(
            "inspect the hub with: cd {}",
            paths.hub_dir().display()
        ));
    }
}
