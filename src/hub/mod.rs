//! hub
//!
//! Lifecycle of the shadow working tree ("hub").
//!
//! # Architecture
//!
//! The hub is a sibling clone of the user repository in which all
//! pipeline mutations occur. The user's working tree is never written
//! before the approval gate succeeds.
//!
//! # Invariants
//!
//! - The hub shares no filesystem writes with the user's working tree
//! - The hub's remote matches the user repo's remote
//! - After a successful run no `commitly/*` branch remains on the hub
//! - After a failed run the hub stays on the last successful agent
//!   branch (unless cleanup-on-failure is configured)
//!
//! The hub manager is the single writer of the hub; agents reach it only
//! through these operations, which in turn go through the git gateway.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::git::{GitError, GitGateway};

/// Attempts for operations hitting the network.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay of the exponential backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Errors from hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub could not be created or refreshed.
    #[error("hub unavailable: {0}")]
    Unavailable(String),

    /// An agent branch for this run id already exists.
    #[error("branch already exists: {0} (run id collision)")]
    BranchExists(String),

    /// The user diff did not apply cleanly.
    #[error("patch conflict: {}", rejected.join("; "))]
    PatchConflict { rejected: Vec<String> },

    /// Underlying git failure.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Filesystem error on the hub directory.
    #[error("hub i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owner of the hub working tree.
#[derive(Debug, Clone)]
pub struct HubManager {
    git: GitGateway,
    workspace: PathBuf,
    hub: PathBuf,
    remote: String,
}

impl HubManager {
    pub fn new(
        git: GitGateway,
        workspace: impl Into<PathBuf>,
        hub: impl Into<PathBuf>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            git,
            workspace: workspace.into(),
            hub: hub.into(),
            remote: remote.into(),
        }
    }

    /// Path of the hub working tree.
    pub fn hub_path(&self) -> &Path {
        &self.hub
    }

    /// Locate or create the hub and bring `working_branch` up to the
    /// remote tip.
    ///
    /// Absent: shallow-clones the user repo's remote. Present: fetches
    /// and fast-forwards. Transient failures are retried up to three
    /// times with exponential backoff before surfacing as
    /// [`HubError::Unavailable`].
    pub async fn ensure(&self, working_branch: &str) -> Result<(), HubError> {
        if self.hub.join(".git").exists() {
            self.with_retries("refresh", || self.refresh(working_branch))
                .await?;
        } else {
            self.with_retries("clone", || self.clone_fresh(working_branch))
                .await?;
        }

        // Pipeline commits carry their own identity; never rely on the
        // machine's global git config.
        self.git
            .git(&self.hub, &["config", "user.name", "commitly"])
            .await?;
        self.git
            .git(&self.hub, &["config", "user.email", "pipeline@commitly.local"])
            .await?;
        Ok(())
    }

    async fn clone_fresh(&self, working_branch: &str) -> Result<(), GitError> {
        let url = self.git.remote_url(&self.workspace, &self.remote).await?;
        let parent = self
            .hub
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        info!(hub = %self.hub.display(), %url, "creating hub");
        self.git
            .clone_shallow(&parent, &url, working_branch, &self.hub)
            .await
    }

    async fn refresh(&self, working_branch: &str) -> Result<(), GitError> {
        self.git.fetch(&self.hub, &self.remote).await?;
        self.git.checkout(&self.hub, working_branch).await?;
        self.git
            .merge_ff_only(&self.hub, &format!("{}/{}", self.remote, working_branch))
            .await
    }

    async fn with_retries<F, Fut>(&self, what: &str, mut op: F) -> Result<(), HubError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), GitError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                    warn!(%what, %attempt, error = %e, "transient hub failure, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(HubError::Unavailable(format!("{} failed: {}", what, e)));
                }
            }
        }
    }

    /// Create `new_branch` from `parent_branch` and leave the hub on it.
    ///
    /// An existing `new_branch` means a run id collision and aborts the
    /// pipeline.
    pub async fn create_agent_branch(
        &self,
        parent_branch: &str,
        new_branch: &str,
    ) -> Result<(), HubError> {
        if self.git.branch_exists(&self.hub, new_branch).await {
            return Err(HubError::BranchExists(new_branch.to_string()));
        }
        self.git.checkout(&self.hub, parent_branch).await?;
        self.git.checkout_new(&self.hub, new_branch).await?;
        Ok(())
    }

    /// Apply the user's unpublished commits onto the current hub branch.
    ///
    /// The patch spans from the workspace's view of the upstream tip
    /// (`<remote>/<branch>`) to the workspace `HEAD`. Returns `false`
    /// when there is nothing to apply (idempotent re-run).
    pub async fn apply_user_diff(&self, working_branch: &str) -> Result<bool, HubError> {
        let upstream = format!("{}/{}", self.remote, working_branch);
        let patch = self
            .git
            .diff_patch(&self.workspace, &upstream, "HEAD")
            .await?;

        if patch.trim().is_empty() {
            info!("no user diff to apply");
            return Ok(false);
        }

        let patch_file = std::env::temp_dir().join(format!(
            "commitly-{}.patch",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::write(&patch_file, format!("{}\n", patch))?;

        let applied = self.git.apply_patch(&self.hub, &patch_file).await;
        let _ = std::fs::remove_file(&patch_file);

        match applied {
            Ok(()) => Ok(true),
            Err(GitError::Exit { stderr, .. }) => Err(HubError::PatchConflict {
                rejected: stderr
                    .lines()
                    .filter(|l| l.contains("patch failed") || l.contains("error:"))
                    .map(str::to_string)
                    .collect(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Hard-reset the hub onto `branch`: working tree cleaned (tracked
    /// and untracked), `branch` checked out at its own tip.
    pub async fn reset_to(&self, branch: &str) -> Result<(), HubError> {
        self.git.reset_hard(&self.hub, "HEAD").await?;
        self.git.clean_untracked(&self.hub).await?;
        self.git.checkout(&self.hub, branch).await?;
        self.git.reset_hard(&self.hub, branch).await?;
        Ok(())
    }

    /// Delete derivative branches. Non-existence is not an error.
    pub async fn cleanup(&self, branches: &[String]) -> Result<(), HubError> {
        for branch in branches {
            match self.git.delete_branch(&self.hub, branch).await {
                Ok(()) => {}
                Err(GitError::Exit { stderr, .. }) if stderr.contains("not found") => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Remove the hub directory entirely (`pipeline.cleanup_hub_on_failure`).
    pub fn remove(&self) -> Result<(), HubError> {
        if self.hub.exists() {
            std::fs::remove_dir_all(&self.hub)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A user repo cloned from a bare "remote", plus a hub manager for it.
    struct Fixture {
        _root: TempDir,
        workspace: PathBuf,
        hub: PathBuf,
        git: GitGateway,
    }

    async fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let git = GitGateway::unlogged();
        let remote = root.path().join("remote.git");
        let workspace = root.path().join("myproj");
        let hub = root.path().join(".commitly_hub_myproj");

        git.git(root.path(), &["init", "--bare", "-b", "main", "remote.git"])
            .await
            .unwrap();
        git.git(
            root.path(),
            &["clone", &remote.to_string_lossy(), "myproj"],
        )
        .await
        .unwrap();
        git.git(&workspace, &["config", "user.email", "dev@example.com"])
            .await
            .unwrap();
        git.git(&workspace, &["config", "user.name", "Dev"])
            .await
            .unwrap();
        std::fs::write(workspace.join("main.py"), "print('hi')\n").unwrap();
        git.commit_all(&workspace, "initial").await.unwrap();
        git.push(&workspace, "origin", "main").await.unwrap();

        Fixture {
            _root: root,
            workspace,
            hub,
            git,
        }
    }

    fn manager(fx: &Fixture) -> HubManager {
        HubManager::new(
            fx.git.clone(),
            fx.workspace.clone(),
            fx.hub.clone(),
            "origin",
        )
    }

    #[tokio::test]
    async fn ensure_clones_when_absent() {
        let fx = fixture().await;
        let hub = manager(&fx);

        hub.ensure("main").await.unwrap();
        assert!(fx.hub.join(".git").exists());
        assert!(fx.hub.join("main.py").exists());
    }

    #[tokio::test]
    async fn ensure_refreshes_when_present() {
        let fx = fixture().await;
        let hub = manager(&fx);
        hub.ensure("main").await.unwrap();

        // Publish a new commit from the workspace, then refresh.
        std::fs::write(fx.workspace.join("extra.py"), "x = 1\n").unwrap();
        fx.git.commit_all(&fx.workspace, "extra").await.unwrap();
        fx.git.push(&fx.workspace, "origin", "main").await.unwrap();

        hub.ensure("main").await.unwrap();
        assert!(fx.hub.join("extra.py").exists());
    }

    #[tokio::test]
    async fn agent_branch_collision_aborts() {
        let fx = fixture().await;
        let hub = manager(&fx);
        hub.ensure("main").await.unwrap();

        hub.create_agent_branch("main", "commitly/clone/0a1b2c3d")
            .await
            .unwrap();
        let err = hub
            .create_agent_branch("main", "commitly/clone/0a1b2c3d")
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::BranchExists(_)));
    }

    #[tokio::test]
    async fn apply_user_diff_carries_unpushed_commits() {
        let fx = fixture().await;
        let hub = manager(&fx);
        hub.ensure("main").await.unwrap();
        hub.create_agent_branch("main", "commitly/clone/0a1b2c3d")
            .await
            .unwrap();

        // New commit in the workspace, not pushed.
        std::fs::write(fx.workspace.join("feature.py"), "def f():\n    return 1\n").unwrap();
        fx.git.commit_all(&fx.workspace, "feature").await.unwrap();

        let applied = hub.apply_user_diff("main").await.unwrap();
        assert!(applied);
        assert!(fx.hub.join("feature.py").exists());
    }

    #[tokio::test]
    async fn apply_user_diff_is_noop_without_changes() {
        let fx = fixture().await;
        let hub = manager(&fx);
        hub.ensure("main").await.unwrap();

        let applied = hub.apply_user_diff("main").await.unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn reset_to_cleans_and_checks_out() {
        let fx = fixture().await;
        let hub = manager(&fx);
        hub.ensure("main").await.unwrap();
        hub.create_agent_branch("main", "commitly/clone/0a1b2c3d")
            .await
            .unwrap();

        // Dirty the hub tree, then roll back to main.
        std::fs::write(fx.hub.join("main.py"), "broken\n").unwrap();
        hub.reset_to("main").await.unwrap();

        assert_eq!(
            fx.git.current_branch(&fx.hub).await.unwrap(),
            "main"
        );
        let content = std::fs::read_to_string(fx.hub.join("main.py")).unwrap();
        assert_eq!(content, "print('hi')\n");
    }

    #[tokio::test]
    async fn cleanup_tolerates_missing_branches() {
        let fx = fixture().await;
        let hub = manager(&fx);
        hub.ensure("main").await.unwrap();
        hub.create_agent_branch("main", "commitly/clone/0a1b2c3d")
            .await
            .unwrap();
        fx.git.checkout(&fx.hub, "main").await.unwrap();

        hub.cleanup(&[
            "commitly/clone/0a1b2c3d".to_string(),
            "commitly/code/0a1b2c3d".to_string(),
        ])
        .await
        .unwrap();
        assert!(!fx.git.branch_exists(&fx.hub, "commitly/clone/0a1b2c3d").await);
    }

    #[tokio::test]
    async fn remove_deletes_hub_directory() {
        let fx = fixture().await;
        let hub = manager(&fx);
        hub.ensure("main").await.unwrap();
        assert!(fx.hub.exists());

        hub.remove().unwrap();
        assert!(!fx.hub.exists());
    }
}
