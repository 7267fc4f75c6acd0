#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Sequences one grading job: prepare the working copy, find and build the
//! submitted files, run the tests, score, report, and clean up.

use std::{
    collections::HashSet,
    fmt::Display,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Context;
use bon::Builder;
use futures::{FutureExt, future::join_all};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::GraderConfig,
    host::{PullRequestHost, Review, StudentRef, Submission, SubmissionStore},
    report::{self, UNKNOWN_STUDENT_COMMENT, WORKSPACE_FAILURE_COMMENT},
    resolver, scorer,
    toolchain::Toolchain,
    types::{
        DeclaredTask, GradingJob, GradingResult, SubmittedFile, TaskReport, TestOutcome,
        total_points,
    },
    workspace::{Workspace, WorkspaceError},
};

/// Errors that end a grading job without a detailed report.
#[derive(thiserror::Error, Debug)]
pub enum GradingError {
    /// The working copy could not be prepared.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// The pull request author is not a registered student.
    #[error("Pull request author {author} is not a registered student")]
    UnresolvedStudent {
        /// Hosting platform user id of the author.
        author: u64,
    },
    /// A collaborator or the local filesystem failed.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Submission loaded, nothing touched yet.
    Init,
    /// Repository present and review branch checked out.
    WorkspaceReady,
    /// Pull request patch applied.
    PatchApplied,
    /// Submitted files located and bound to tasks.
    FilesDiscovered,
    /// Every task compiled, tested and scored.
    PerTaskProcessed,
    /// Report posted.
    Reported,
    /// A workspace failure ended the job early.
    Aborted,
    /// Working copy restored.
    CleanedUp,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::WorkspaceReady => "workspace-ready",
            Stage::PatchApplied => "patch-applied",
            Stage::FilesDiscovered => "files-discovered",
            Stage::PerTaskProcessed => "per-task-processed",
            Stage::Reported => "reported",
            Stage::Aborted => "aborted",
            Stage::CleanedUp => "cleaned-up",
        };
        f.write_str(name)
    }
}

/// Marks a working copy busy for as long as it lives.
struct WorkdirLease<'a> {
    /// Working copies currently in use.
    active: &'a Mutex<HashSet<PathBuf>>,
    /// The leased working copy.
    path:   PathBuf,
}

impl Drop for WorkdirLease<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

/// Grades submissions end to end.
#[derive(Builder)]
pub struct GradingEngine {
    /// Shared settings.
    config:    GraderConfig,
    /// Submissions, tasks and students.
    store:     Arc<dyn SubmissionStore>,
    /// Pull request platform.
    host:      Arc<dyn PullRequestHost>,
    /// Working copy operations.
    workspace: Arc<dyn Workspace>,
    /// Compiler and program runner.
    toolchain: Arc<dyn Toolchain>,
    /// Working copies with a job in flight.
    #[builder(skip)]
    active:    Mutex<HashSet<PathBuf>>,
}

impl GradingEngine {
    /// Grades one submission.
    ///
    /// On success the report has been posted and, on full marks, the pull
    /// request merged. On a workspace failure a short comment has been
    /// posted instead. The working copy is restored either way.
    pub async fn grade_submission(&self, submission_id: u64) -> Result<GradingResult, GradingError> {
        let span = info_span!("grade", submission = submission_id, run = %Uuid::new_v4());
        self.grade_submission_inner(submission_id)
            .instrument(span)
            .await
    }

    /// Grades several submissions concurrently, each in its own working copy.
    pub async fn grade_many(
        &self,
        submission_ids: &[u64],
    ) -> Vec<(u64, Result<GradingResult, GradingError>)> {
        join_all(submission_ids.iter().map(|&id| async move {
            (id, self.grade_submission(id).await)
        }))
        .await
    }

    /// Body of [`Self::grade_submission`], run inside the job span.
    async fn grade_submission_inner(
        &self,
        submission_id: u64,
    ) -> Result<GradingResult, GradingError> {
        let submission = self.store.fetch_submission(submission_id).await?;
        let pr = &submission.pull_request;

        let author = self.host.author_id(pr).await?;
        let Some(student) = self.store.resolve_student(author).await? else {
            warn!(author, pull_request = %pr, "rejecting pull request from unknown author");
            self.host.post_comment(pr, UNKNOWN_STUDENT_COMMENT).await?;
            self.host.close(pr).await?;
            return Err(GradingError::UnresolvedStudent { author });
        };

        let tasks = self.store.fetch_declared_tasks(&submission.assignment).await?;
        let patch = self.host.patch(pr).await?;
        let job = GradingJob::new(submission_id, patch, self.config.workspace_root());
        let _lease = self.lease(&job.workdir)?;
        info!(stage = %Stage::Init, workdir = %job.workdir.display(), branch = %job.branch);

        let outcome = self.run_job(&job, &submission, &student, &tasks).await;

        match self
            .workspace
            .end_job(&job.workdir, self.config.default_branch(), &job.branch)
            .await
        {
            Ok(()) => {
                info!(stage = %Stage::CleanedUp);
                if self.config.prune_workspaces()
                    && let Err(e) = tokio::fs::remove_dir_all(&job.workdir).await
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(workdir = %job.workdir.display(), error = %e, "could not prune working copy");
                }
            }
            Err(e) => error!(stage = %Stage::CleanedUp, error = %e, "cleanup failed"),
        }

        if let Err(GradingError::Workspace(e)) = &outcome {
            error!(stage = %Stage::Aborted, error = %e, "workspace failure");
            if let Err(post) = self.host.post_comment(pr, WORKSPACE_FAILURE_COMMENT).await {
                warn!(error = %post, "could not post failure comment");
            }
        }

        outcome
    }

    /// Reserves a working copy for one job.
    fn lease(&self, path: &Path) -> Result<WorkdirLease<'_>, WorkspaceError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(path.to_path_buf()) {
            return Err(WorkspaceError::InUse {
                path: path.to_path_buf(),
            });
        }
        Ok(WorkdirLease {
            active: &self.active,
            path:   path.to_path_buf(),
        })
    }

    /// Everything between acquiring the working copy and releasing it.
    async fn run_job(
        &self,
        job: &GradingJob,
        submission: &Submission,
        student: &StudentRef,
        tasks: &[DeclaredTask],
    ) -> Result<GradingResult, GradingError> {
        let pr = &submission.pull_request;

        self.workspace
            .ensure_repository(self.config.repository_url(), &job.workdir)
            .await?;
        self.workspace.begin_job(&job.workdir, &job.branch).await?;
        info!(stage = %Stage::WorkspaceReady);

        self.workspace.apply_patch(&job.workdir, &job.patch).await?;
        info!(stage = %Stage::PatchApplied);

        let root = job.workdir.join(submission.source_dir(student));
        let result = grade_tree(
            self.toolchain.as_ref(),
            &self.config,
            &job.workdir,
            &root,
            tasks,
        )
        .await?;

        let body = report::render(&result);
        self.host.post_comment(pr, &body).await?;
        info!(
            stage = %Stage::Reported,
            earned = result.total_earned,
            possible = result.total_possible
        );

        let review = Review {
            submission_id: job.submission_id,
            earned:        result.total_earned,
            possible:      result.total_possible,
            description:   body,
        };
        if let Err(e) = self.store.record_review(&review).await {
            warn!(error = %e, "could not record review");
        }

        if result.is_perfect() {
            let state = self.host.state(pr).await?;
            if report::decide_merge(result.total_earned, result.total_possible, &state) {
                self.host.merge(pr).await?;
                info!(pull_request = %pr, "merged");
            } else {
                info!(?state, "full marks but not merging");
            }
        }

        Ok(result)
    }
}

/// Grades the C sources found under `root` against `tasks`.
///
/// `workspace` is hidden from compiler diagnostics. Problems with a single
/// task never fail the whole tree; they are recorded in that task's report.
pub async fn grade_tree(
    toolchain: &dyn Toolchain,
    config: &GraderConfig,
    workspace: &Path,
    root: &Path,
    tasks: &[DeclaredTask],
) -> Result<GradingResult, GradingError> {
    let files = resolver::discover(root)?;
    let mut resolved = resolver::resolve_all(files, tasks.len());

    let declared: HashSet<u32> = tasks.iter().map(|task| task.number).collect();
    let (bound, stray): (Vec<_>, Vec<_>) = std::mem::take(&mut resolved.bindings)
        .into_iter()
        .partition(|(number, _)| declared.contains(number));
    resolved.bindings = bound.into_iter().collect();
    resolved
        .unrecognized
        .extend(stray.into_iter().map(|(_, file)| SubmittedFile { task: None, ..file }));
    resolved.unrecognized.sort_by(|a, b| a.name.cmp(&b.name));

    info!(
        stage = %Stage::FilesDiscovered,
        bound = resolved.bindings.len(),
        unrecognized = resolved.unrecognized.len()
    );

    let build_dir = tempfile::Builder::new()
        .prefix("classgrade-build-")
        .tempdir()
        .context("Could not create build directory")?;

    let mut ordered: Vec<&DeclaredTask> = tasks.iter().collect();
    ordered.sort_by_key(|task| task.number);

    let mut reports = Vec::with_capacity(ordered.len());
    for task in ordered {
        let mut report = match resolved.bindings.get(&task.number) {
            None => TaskReport::unsubmitted(task),
            Some(file) => {
                let graded = AssertUnwindSafe(grade_task(
                    toolchain,
                    config,
                    workspace,
                    build_dir.path(),
                    task,
                    file,
                ))
                .catch_unwind()
                .await;

                graded.unwrap_or_else(|_| {
                    error!(task = task.number, "grading panicked");
                    TaskReport::submitted(task, None, vec![TestOutcome::ExecutionError {
                        message: "The grader failed while processing this task.".into(),
                    }])
                })
            }
        };
        report.earned = scorer::score_task(&report);
        reports.push(report);
    }

    let result = GradingResult {
        total_earned: scorer::score_all(&reports),
        total_possible: total_points(tasks),
        tasks: reports,
        unrecognized: resolved.unrecognized,
    };
    info!(stage = %Stage::PerTaskProcessed, earned = result.total_earned);

    Ok(result)
}

/// Compiles one submitted file and runs the task's test cases against it.
async fn grade_task(
    toolchain: &dyn Toolchain,
    config: &GraderConfig,
    workspace: &Path,
    build_dir: &Path,
    task: &DeclaredTask,
    file: &SubmittedFile,
) -> TaskReport {
    let output = build_dir.join(format!("task-{}", task.number));

    let compile = match toolchain
        .compile(&file.path, &output, workspace, config.compile_timeout())
        .await
    {
        Ok(compile) => compile,
        Err(e) => {
            warn!(task = task.number, file = %file.name, error = %e, "compiler could not run");
            return TaskReport::submitted(task, None, vec![TestOutcome::ExecutionError {
                message: format!("The compiler could not be run: {e:#}"),
            }]);
        }
    };

    let executable = match (&compile.artifact, compile.succeeded()) {
        (Some(artifact), true) => artifact.clone(),
        _ => {
            info!(task = task.number, exit_code = compile.exit_code, "compilation failed");
            return TaskReport::submitted(task, Some(compile), Vec::new());
        }
    };

    let mut outcomes = Vec::with_capacity(task.tests.len());
    for case in &task.tests {
        let outcome = match toolchain
            .execute(&executable, case, config.test_timeout())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(task = task.number, error = %e, "test run failed");
                TestOutcome::ExecutionError {
                    message: format!("{e:#}"),
                }
            }
        };
        outcomes.push(outcome);
    }

    TaskReport::submitted(task, Some(compile), outcomes)
}
