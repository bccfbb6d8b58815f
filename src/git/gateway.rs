//! git::gateway
//!
//! Thin wrapper around the system `git` binary.
//!
//! This module is the **single doorway** to version control: every hub
//! mutation flows through it, so the operation log is complete and
//! failures surface uniformly as typed [`GitError`]s. No other module
//! may spawn `git`.
//!
//! # Logging
//!
//! Each gateway instance appends one line per invocation (arguments,
//! exit code, duration) to a timestamped file under
//! `.commitly/logs/git/`, plus stderr on failure. Post-mortems can
//! replay the exact command sequence of a run.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::debug;

use crate::core::types::CommitInfo;
use crate::process::{run_command, CommandSpec, ExecError, ExecOptions};

/// Wall-clock budget for a single git invocation. Network operations
/// (clone, fetch, push) share it; they are retried above this layer.
const GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Unit separator used in `--format` strings.
const FIELD_SEP: char = '\x1f';

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// git exited non-zero.
    #[error("git {args} exited {code}: {stderr}")]
    Exit {
        args: String,
        code: i32,
        stderr: String,
    },

    /// git did not finish within the per-call budget.
    #[error("git {args} timed out")]
    Timeout { args: String },

    /// git itself could not be spawned.
    #[error("cannot run git: {0}")]
    Unavailable(String),

    /// Output was not in the expected shape.
    #[error("unexpected git output for {args}: {message}")]
    Malformed { args: String, message: String },
}

impl GitError {
    /// Whether this failure class is worth retrying (network-ish).
    pub fn is_transient(&self) -> bool {
        match self {
            GitError::Timeout { .. } => true,
            GitError::Exit { stderr, .. } => {
                let s = stderr.to_lowercase();
                s.contains("could not resolve host")
                    || s.contains("connection")
                    || s.contains("early eof")
                    || s.contains("remote end hung up")
            }
            _ => false,
        }
    }
}

/// One line of `git diff --numstat` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumstatEntry {
    pub added: u64,
    pub deleted: u64,
    pub path: PathBuf,
}

/// The gateway. Cheap to clone; the log path is shared.
#[derive(Debug, Clone)]
pub struct GitGateway {
    log_file: Option<PathBuf>,
}

impl GitGateway {
    /// Create a gateway logging to `<git_log_dir>/<timestamp>.log`.
    pub fn new(git_log_dir: &Path) -> Self {
        let name = format!("{}.log", Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ"));
        Self {
            log_file: Some(git_log_dir.join(name)),
        }
    }

    /// A gateway that does not write an operation log (tests).
    pub fn unlogged() -> Self {
        Self { log_file: None }
    }

    /// Run git with `args` in `dir`, returning trimmed stdout.
    pub async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let spec = CommandSpec {
            program: "git".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        };
        let opts = ExecOptions::new(dir, GIT_TIMEOUT);
        let pretty = args.join(" ");
        let started = Utc::now();

        let result = run_command(&spec, &opts).await;

        let (line, out) = match result {
            Ok(out) if out.success() => {
                let line = format!(
                    "{} [{}] git {} -> 0 ({}ms)\n",
                    started.to_rfc3339_opts(SecondsFormat::Millis, true),
                    dir.display(),
                    pretty,
                    out.elapsed.as_millis()
                );
                (line, Ok(out.stdout.trim_end().to_string()))
            }
            Ok(out) => {
                let mut line = format!(
                    "{} [{}] git {} -> {} ({}ms)\n",
                    started.to_rfc3339_opts(SecondsFormat::Millis, true),
                    dir.display(),
                    pretty,
                    out.code,
                    out.elapsed.as_millis()
                );
                for l in out.stderr.lines() {
                    let _ = writeln!(line, "    stderr: {}", l);
                }
                (
                    line,
                    Err(GitError::Exit {
                        args: pretty.clone(),
                        code: out.code,
                        stderr: out.stderr.trim_end().to_string(),
                    }),
                )
            }
            Err(ExecError::Timeout { .. }) => {
                let line = format!(
                    "{} [{}] git {} -> timeout\n",
                    started.to_rfc3339_opts(SecondsFormat::Millis, true),
                    dir.display(),
                    pretty
                );
                (line, Err(GitError::Timeout { args: pretty.clone() }))
            }
            Err(e) => (
                format!(
                    "{} [{}] git {} -> spawn error: {}\n",
                    started.to_rfc3339_opts(SecondsFormat::Millis, true),
                    dir.display(),
                    pretty,
                    e
                ),
                Err(GitError::Unavailable(e.to_string())),
            ),
        };

        self.append_log(&line);
        debug!(target: "commitly::git", dir = %dir.display(), "git {}", pretty);
        out
    }

    fn append_log(&self, line: &str) {
        if let Some(path) = &self.log_file {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            use std::io::Write;
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }

    // ------------------------------------------------------------------
    // Wire operations
    // ------------------------------------------------------------------

    /// `git clone --depth 1 --branch <branch> <url> <dest>`
    pub async fn clone_shallow(
        &self,
        parent_dir: &Path,
        url: &str,
        branch: &str,
        dest: &Path,
    ) -> Result<(), GitError> {
        self.git(
            parent_dir,
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                branch,
                url,
                &dest.to_string_lossy(),
            ],
        )
        .await
        .map(drop)
    }

    pub async fn fetch(&self, dir: &Path, remote: &str) -> Result<(), GitError> {
        self.git(dir, &["fetch", remote]).await.map(drop)
    }

    pub async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.git(dir, &["checkout", branch]).await.map(drop)
    }

    /// `git checkout -b <branch>`
    pub async fn checkout_new(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.git(dir, &["checkout", "-b", branch]).await.map(drop)
    }

    pub async fn reset_hard(&self, dir: &Path, target: &str) -> Result<(), GitError> {
        self.git(dir, &["reset", "--hard", target]).await.map(drop)
    }

    /// Remove untracked files and directories.
    pub async fn clean_untracked(&self, dir: &Path) -> Result<(), GitError> {
        self.git(dir, &["clean", "-fd"]).await.map(drop)
    }

    /// Apply a patch file to the working tree.
    pub async fn apply_patch(&self, dir: &Path, patch_file: &Path) -> Result<(), GitError> {
        self.git(
            dir,
            &["apply", "--whitespace=nowarn", &patch_file.to_string_lossy()],
        )
        .await
        .map(drop)
    }

    /// Stage everything and commit. `--allow-empty` keeps the per-agent
    /// commit protocol intact on no-op runs.
    pub async fn commit_all(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        self.git(dir, &["add", "-A"]).await?;
        self.git(dir, &["commit", "--allow-empty", "-m", message])
            .await
            .map(drop)
    }

    pub async fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.git(dir, &["push", remote, branch]).await.map(drop)
    }

    /// `git branch -D`. Non-existence is surfaced; callers that tolerate
    /// it check [`Self::branch_exists`] or ignore the error.
    pub async fn delete_branch(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        self.git(dir, &["branch", "-D", branch]).await.map(drop)
    }

    pub async fn branch_exists(&self, dir: &Path, branch: &str) -> bool {
        self.git(
            dir,
            &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)],
        )
        .await
        .is_ok()
    }

    /// `git status --porcelain`, one entry per line.
    pub async fn status_porcelain(&self, dir: &Path) -> Result<Vec<String>, GitError> {
        let out = self.git(dir, &["status", "--porcelain"]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Paths changed in `range` (e.g. `a..b`), relative to the repo root.
    pub async fn diff_name_only(&self, dir: &Path, range: &str) -> Result<Vec<PathBuf>, GitError> {
        let out = self.git(dir, &["diff", "--name-only", range]).await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Added/deleted line counts per file in `range`.
    pub async fn diff_numstat(&self, dir: &Path, range: &str) -> Result<Vec<NumstatEntry>, GitError> {
        let args = format!("diff --numstat {}", range);
        let out = self.git(dir, &["diff", "--numstat", range]).await?;
        out.lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let mut parts = line.splitn(3, '\t');
                let added = parts.next().unwrap_or("0");
                let deleted = parts.next().unwrap_or("0");
                let path = parts.next().ok_or_else(|| GitError::Malformed {
                    args: args.clone(),
                    message: format!("numstat line {:?}", line),
                })?;
                Ok(NumstatEntry {
                    // Binary files report "-"; count them as zero.
                    added: added.parse().unwrap_or(0),
                    deleted: deleted.parse().unwrap_or(0),
                    path: PathBuf::from(path),
                })
            })
            .collect()
    }

    /// Unified diff text between two revisions.
    pub async fn diff_patch(&self, dir: &Path, from: &str, to: &str) -> Result<String, GitError> {
        self.git(dir, &["diff", "--binary", &format!("{}..{}", from, to)])
            .await
    }

    pub async fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String, GitError> {
        self.git(dir, &["rev-parse", rev]).await
    }

    pub async fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        self.git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn remote_url(&self, dir: &Path, remote: &str) -> Result<String, GitError> {
        self.git(dir, &["remote", "get-url", remote]).await
    }

    /// Whether `ancestor` is an ancestor of `descendant`.
    pub async fn is_ancestor(
        &self,
        dir: &Path,
        ancestor: &str,
        descendant: &str,
    ) -> Result<bool, GitError> {
        match self
            .git(dir, &["merge-base", "--is-ancestor", ancestor, descendant])
            .await
        {
            Ok(_) => Ok(true),
            Err(GitError::Exit { code: 1, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn merge_ff_only(&self, dir: &Path, target: &str) -> Result<(), GitError> {
        self.git(dir, &["merge", "--ff-only", target]).await.map(drop)
    }

    /// Commits in `range` (e.g. `origin/main..HEAD`), oldest first.
    pub async fn commits_in_range(
        &self,
        dir: &Path,
        range: &str,
    ) -> Result<Vec<CommitInfo>, GitError> {
        let format = format!("%H{sep}%s{sep}%an{sep}%aI", sep = FIELD_SEP);
        let out = self
            .git(
                dir,
                &["log", "--reverse", &format!("--format={}", format), range],
            )
            .await?;

        let args = format!("log {}", range);
        out.lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let fields: Vec<&str> = line.split(FIELD_SEP).collect();
                if fields.len() != 4 {
                    return Err(GitError::Malformed {
                        args: args.clone(),
                        message: format!("log line {:?}", line),
                    });
                }
                let timestamp = chrono::DateTime::parse_from_rfc3339(fields[3])
                    .map_err(|e| GitError::Malformed {
                        args: args.clone(),
                        message: format!("bad timestamp {:?}: {}", fields[3], e),
                    })?
                    .with_timezone(&Utc);
                Ok(CommitInfo {
                    id: fields[0].to_string(),
                    message: fields[1].to_string(),
                    author: fields[2].to_string(),
                    timestamp,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a real repository with one commit.
    async fn init_repo(gw: &GitGateway) -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        gw.git(dir, &["init", "-b", "main"]).await.unwrap();
        gw.git(dir, &["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        gw.git(dir, &["config", "user.name", "Test User"])
            .await
            .unwrap();
        std::fs::write(dir.join("README.md"), "# test\n").unwrap();
        gw.commit_all(dir, "initial").await.unwrap();
        temp
    }

    #[tokio::test]
    async fn rev_parse_and_current_branch() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;

        let head = gw.rev_parse(repo.path(), "HEAD").await.unwrap();
        assert_eq!(head.len(), 40);
        assert_eq!(gw.current_branch(repo.path()).await.unwrap(), "main");
    }

    #[tokio::test]
    async fn checkout_new_and_branch_exists() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;

        gw.checkout_new(repo.path(), "commitly/clone/0a1b2c3d")
            .await
            .unwrap();
        assert!(gw.branch_exists(repo.path(), "commitly/clone/0a1b2c3d").await);
        assert!(!gw.branch_exists(repo.path(), "commitly/clone/ffffffff").await);
    }

    #[tokio::test]
    async fn delete_branch_errors_on_missing() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;

        let err = gw
            .delete_branch(repo.path(), "no-such-branch")
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Exit { .. }));
    }

    #[tokio::test]
    async fn status_porcelain_reports_changes() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;

        assert!(gw.status_porcelain(repo.path()).await.unwrap().is_empty());

        std::fs::write(repo.path().join("new.py"), "x = 1\n").unwrap();
        let status = gw.status_porcelain(repo.path()).await.unwrap();
        assert_eq!(status.len(), 1);
        assert!(status[0].contains("new.py"));
    }

    #[tokio::test]
    async fn diff_name_only_and_numstat() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;
        let base = gw.rev_parse(repo.path(), "HEAD").await.unwrap();

        std::fs::write(repo.path().join("app.py"), "a = 1\nb = 2\n").unwrap();
        gw.commit_all(repo.path(), "add app").await.unwrap();

        let range = format!("{}..HEAD", base);
        let files = gw.diff_name_only(repo.path(), &range).await.unwrap();
        assert_eq!(files, vec![PathBuf::from("app.py")]);

        let stats = gw.diff_numstat(repo.path(), &range).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].added, 2);
        assert_eq!(stats[0].deleted, 0);
    }

    #[tokio::test]
    async fn patch_round_trip_between_clones() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;
        let base = gw.rev_parse(repo.path(), "HEAD").await.unwrap();

        std::fs::write(repo.path().join("README.md"), "# test\nmore\n").unwrap();
        gw.commit_all(repo.path(), "change readme").await.unwrap();

        let patch = gw
            .diff_patch(repo.path(), &base, "HEAD")
            .await
            .unwrap();
        assert!(patch.contains("+more"));

        // Apply the patch onto a fresh checkout of the base commit.
        gw.reset_hard(repo.path(), &base).await.unwrap();
        let patch_file = repo.path().join(".patch");
        std::fs::write(&patch_file, format!("{}\n", patch)).unwrap();
        gw.apply_patch(repo.path(), &patch_file).await.unwrap();
        let readme = std::fs::read_to_string(repo.path().join("README.md")).unwrap();
        assert!(readme.contains("more"));
    }

    #[tokio::test]
    async fn conflicting_patch_is_exit_error() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;

        let patch_file = repo.path().join(".patch");
        std::fs::write(
            &patch_file,
            "--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-not the real line\n+something\n",
        )
        .unwrap();
        let err = gw.apply_patch(repo.path(), &patch_file).await.unwrap_err();
        assert!(matches!(err, GitError::Exit { .. }));
    }

    #[tokio::test]
    async fn commits_in_range_parses_fields() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;
        let base = gw.rev_parse(repo.path(), "HEAD").await.unwrap();

        std::fs::write(repo.path().join("a.py"), "a\n").unwrap();
        gw.commit_all(repo.path(), "first change").await.unwrap();
        std::fs::write(repo.path().join("b.py"), "b\n").unwrap();
        gw.commit_all(repo.path(), "second change").await.unwrap();

        let commits = gw
            .commits_in_range(repo.path(), &format!("{}..HEAD", base))
            .await
            .unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].message, "first change");
        assert_eq!(commits[1].message, "second change");
        assert_eq!(commits[0].author, "Test User");
    }

    #[tokio::test]
    async fn is_ancestor_both_directions() {
        let gw = GitGateway::unlogged();
        let repo = init_repo(&gw).await;
        let base = gw.rev_parse(repo.path(), "HEAD").await.unwrap();

        std::fs::write(repo.path().join("c.py"), "c\n").unwrap();
        gw.commit_all(repo.path(), "tip").await.unwrap();
        let tip = gw.rev_parse(repo.path(), "HEAD").await.unwrap();

        assert!(gw.is_ancestor(repo.path(), &base, &tip).await.unwrap());
        assert!(!gw.is_ancestor(repo.path(), &tip, &base).await.unwrap());
    }

    #[tokio::test]
    async fn operation_log_written() {
        let temp = TempDir::new().unwrap();
        let log_dir = temp.path().join("logs").join("git");
        let gw = GitGateway::new(&log_dir);

        let repo = init_repo(&gw).await;
        let _ = gw.current_branch(repo.path()).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let contents =
            std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("rev-parse --abbrev-ref HEAD"));
        assert!(contents.contains("-> 0"));
    }

    #[test]
    fn transient_classification() {
        assert!(GitError::Timeout {
            args: "push".into()
        }
        .is_transient());
        assert!(GitError::Exit {
            args: "push origin main".into(),
            code: 128,
            stderr: "fatal: Could not resolve host: github.com".into(),
        }
        .is_transient());
        assert!(!GitError::Exit {
            args: "commit".into(),
            code: 1,
            stderr: "nothing to commit".into(),
        }
        .is_transient());
    }
}
