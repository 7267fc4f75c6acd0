#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Git working copies used as grading sandboxes.
//!
//! A working copy holds one job at a time: `begin_job` creates the review
//! branch, `apply_patch` dirties the tree and `end_job` puts everything back.
//! Concurrent jobs must use different working copies.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::process::{self, Bounded, Collected, StdinSource};

/// Failures of the workspace layer. All of them abort the grading job.
#[derive(thiserror::Error, Debug)]
pub enum WorkspaceError {
    /// The remote repository could not be cloned.
    #[error("Could not clone {url}: {message}")]
    Clone {
        /// Remote that was cloned.
        url:     String,
        /// git's explanation.
        message: String,
    },
    /// A branch or checkout operation failed.
    #[error("git {command} failed in {}: {message}", .workdir.display())]
    Checkout {
        /// git subcommand that failed.
        command: String,
        /// Working copy it ran in.
        workdir: PathBuf,
        /// git's explanation.
        message: String,
    },
    /// The review branch is left over from another job.
    #[error("Branch {branch} already exists")]
    BranchExists {
        /// Name of the branch.
        branch: String,
    },
    /// The pull request patch does not apply.
    #[error("Could not apply patch: {message}")]
    PatchApply {
        /// git's explanation.
        message: String,
    },
    /// Another job is using this working copy.
    #[error("Working copy {} is in use by another job", .path.display())]
    InUse {
        /// The contested working copy.
        path: PathBuf,
    },
}

/// Operations the grading engine needs from a working copy.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Clones `url` into `local_path` unless a repository is already there.
    async fn ensure_repository(&self, url: &str, local_path: &Path) -> Result<(), WorkspaceError>;

    /// Updates the current branch and checks out a new `branch` from it.
    async fn begin_job(&self, local_path: &Path, branch: &str) -> Result<(), WorkspaceError>;

    /// Applies a mailbox-style patch, ignoring whitespace-only differences.
    async fn apply_patch(&self, local_path: &Path, patch: &[u8]) -> Result<(), WorkspaceError>;

    /// Returns to `default_branch`, discards all changes and untracked files,
    /// and deletes `branch`. Safe to call after any partial failure.
    async fn end_job(
        &self,
        local_path: &Path,
        default_branch: &str,
        branch: &str,
    ) -> Result<(), WorkspaceError>;
}

/// [`Workspace`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    /// Path or name of the git executable.
    git:     OsString,
    /// Upper bound for any single git command.
    timeout: Duration,
}

impl GitWorkspace {
    /// Creates a workspace driver using `git` from `PATH`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            git: "git".into(),
            timeout,
        }
    }

    /// Runs `git <args>` in `dir`. `Err` holds git's stderr (or the reason
    /// git could not be run) and the subcommand name.
    async fn git(
        &self,
        dir: &Path,
        args: &[&str],
        stdin: StdinSource,
    ) -> Result<Collected, (String, String)> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        let env = [(OsString::from("GIT_TERMINAL_PROMPT"), OsString::from("0"))];

        debug!(workdir = %dir.display(), ?args, "running git");
        let bounded =
            process::run_collect(&self.git, &os_args, stdin, Some(dir), &env, Some(self.timeout))
                .await
                .map_err(|e| (command.clone(), format!("{e:#}")))?;

        match bounded {
            Bounded::Completed(collected) if collected.status.success() => Ok(collected),
            Bounded::Completed(collected) => {
                let stderr = String::from_utf8_lossy(&collected.stderr).trim().to_string();
                Err((command, stderr))
            }
            Bounded::TimedOut(limit) => {
                Err((command, format!("timed out after {} seconds", limit.as_secs())))
            }
        }
    }

    /// Runs a git command whose failure is a [`WorkspaceError::Checkout`].
    async fn checkout_step(&self, dir: &Path, args: &[&str]) -> Result<(), WorkspaceError> {
        self.git(dir, args, StdinSource::Null)
            .await
            .map(|_| ())
            .map_err(|(command, message)| WorkspaceError::Checkout {
                command,
                workdir: dir.to_path_buf(),
                message,
            })
    }

    /// Whether a local branch named `branch` exists.
    async fn branch_exists(&self, dir: &Path, branch: &str) -> bool {
        let reference = format!("refs/heads/{branch}");
        self.git(
            dir,
            &["rev-parse", "--verify", "--quiet", &reference],
            StdinSource::Null,
        )
        .await
        .is_ok()
    }

    /// Whether the current branch tracks a remote branch worth pulling.
    async fn has_upstream(&self, dir: &Path) -> bool {
        self.git(
            dir,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
            StdinSource::Null,
        )
        .await
        .is_ok()
    }
}

/// Whether `path` is the top of a git working copy.
fn is_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn ensure_repository(&self, url: &str, local_path: &Path) -> Result<(), WorkspaceError> {
        if is_repository(local_path) {
            return Ok(());
        }

        let parent = local_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let target = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| WorkspaceError::Clone {
                url:     url.to_string(),
                message: format!("{} is not a directory name", local_path.display()),
            })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WorkspaceError::Clone {
                url:     url.to_string(),
                message: format!("cannot create {}: {e}", parent.display()),
            })?;

        info!(url, path = %local_path.display(), "cloning repository");
        self.git(parent, &["clone", "--quiet", url, &target], StdinSource::Null)
            .await
            .map(|_| ())
            .map_err(|(_, message)| WorkspaceError::Clone {
                url: url.to_string(),
                message,
            })
    }

    async fn begin_job(&self, local_path: &Path, branch: &str) -> Result<(), WorkspaceError> {
        if self.has_upstream(local_path).await {
            self.checkout_step(local_path, &["pull", "--ff-only", "--quiet"])
                .await?;
        }

        if self.branch_exists(local_path, branch).await {
            return Err(WorkspaceError::BranchExists {
                branch: branch.to_string(),
            });
        }

        self.checkout_step(local_path, &["checkout", "--quiet", "-b", branch, "HEAD"])
            .await
    }

    async fn apply_patch(&self, local_path: &Path, patch: &[u8]) -> Result<(), WorkspaceError> {
        self.git(
            local_path,
            &["apply", "--ignore-space-change", "--ignore-whitespace", "-"],
            StdinSource::Bytes(patch.to_vec()),
        )
        .await
        .map(|_| ())
        .map_err(|(_, message)| WorkspaceError::PatchApply { message })
    }

    async fn end_job(
        &self,
        local_path: &Path,
        default_branch: &str,
        branch: &str,
    ) -> Result<(), WorkspaceError> {
        if !is_repository(local_path) {
            return Ok(());
        }

        // Every step runs even if an earlier one fails; the first error wins.
        let steps: [&[&str]; 3] = [
            &["checkout", "--quiet", "--force", default_branch],
            &["reset", "--quiet", "--hard"],
            &["clean", "--quiet", "-fdx"],
        ];

        let mut first_error = None;
        for args in steps {
            if let Err(e) = self.checkout_step(local_path, args).await {
                warn!(workdir = %local_path.display(), error = %e, "cleanup step failed");
                first_error.get_or_insert(e);
            }
        }

        if self.branch_exists(local_path, branch).await
            && let Err(e) = self
                .checkout_step(local_path, &["branch", "--quiet", "-D", branch])
                .await
        {
            warn!(workdir = %local_path.display(), error = %e, "could not delete review branch");
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
