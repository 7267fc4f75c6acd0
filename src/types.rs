#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};

/// An (input, expected output) pair used to validate a compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct TestCase {
    /// Bytes fed to the program on stdin.
    #[serde(default)]
    #[builder(default)]
    pub input:    String,
    /// Expected stdout, in normalized form.
    pub expected: String,
}

/// One graded exercise of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct DeclaredTask {
    /// 1-based task number; submitted filenames resolve to this.
    pub number: u32,
    /// Human readable title shown in the report.
    #[serde(default)]
    #[builder(default)]
    pub title:  String,
    /// Maximum points for this task.
    pub points: i64,
    /// Test cases, in the order they are run and reported.
    #[serde(default)]
    #[builder(default, with = |cases: impl IntoIterator<Item = TestCase>| cases.into_iter().collect())]
    pub tests:  Vec<TestCase>,
}

/// Sum of declared points over an assignment's tasks.
pub fn total_points(tasks: &[DeclaredTask]) -> i64 {
    tasks.iter().map(|task| task.points).sum()
}

/// A single grading run for one submission.
#[derive(Debug, Clone)]
pub struct GradingJob {
    /// Identifier of the submission being graded.
    pub submission_id: u64,
    /// Patch taken from the pull request.
    pub patch:         Vec<u8>,
    /// Working copy owned by this job.
    pub workdir:       PathBuf,
    /// Review branch created for this job.
    pub branch:        String,
}

impl GradingJob {
    /// Creates a job whose working copy lives under `workspace_root`, keyed by
    /// submission id so that concurrent jobs never share one.
    pub fn new(submission_id: u64, patch: Vec<u8>, workspace_root: &Path) -> Self {
        Self {
            submission_id,
            patch,
            workdir: workspace_root.join(format!("submission-{submission_id}")),
            branch: Self::branch_name(submission_id),
        }
    }

    /// Name of the review branch for a submission.
    pub fn branch_name(submission_id: u64) -> String {
        format!("review#{submission_id}")
    }
}

/// A C source file found in the submission tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedFile {
    /// File name relative to the student's directory.
    pub name: String,
    /// Absolute path inside the working copy.
    pub path: PathBuf,
    /// Task the file resolved to, if any.
    pub task: Option<u32>,
}

/// Outcome of compiling one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileResult {
    /// Compiler exit code; `-1` when the compiler was killed.
    pub exit_code: i32,
    /// stdout and stderr of the compiler with workspace paths stripped.
    pub output:    String,
    /// Compiled executable, present only when `exit_code` is zero.
    pub artifact:  Option<PathBuf>,
}

impl CompileResult {
    /// Whether an executable was produced.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.artifact.is_some()
    }

    /// Whether the compiler said anything at all, warnings included.
    pub fn has_diagnostics(&self) -> bool {
        !self.output.trim().is_empty()
    }
}

/// Classification of one test case run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    /// Normalized output matched.
    Passed,
    /// Output differed, or the program exited with a non-zero code.
    Mismatch {
        /// Input that was fed to the program.
        input:    String,
        /// Normalized expected output.
        expected: String,
        /// Normalized actual output.
        actual:   String,
    },
    /// The program was killed for exceeding its time limit.
    Timeout {
        /// Input that was fed to the program.
        input: String,
    },
    /// The program could not be run at all.
    ExecutionError {
        /// What went wrong.
        message: String,
    },
}

impl TestOutcome {
    /// Whether this outcome counts towards the score.
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

/// Whether a file for a task was found in the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// A file resolved to the task.
    Submitted,
    /// No file resolved to the task.
    Unsubmitted,
}

/// Everything the grader learned about one declared task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    /// Declared task number.
    pub number:          u32,
    /// Declared task title.
    pub title:           String,
    /// Declared point value.
    pub possible:        i64,
    /// Number of declared test cases.
    pub test_case_count: usize,
    /// Whether a file was submitted for the task.
    pub status:          SubmissionStatus,
    /// Compilation outcome; absent when unsubmitted or when the compiler
    /// could not be run.
    pub compile:         Option<CompileResult>,
    /// One outcome per test case that was run.
    pub outcomes:        Vec<TestOutcome>,
    /// Points awarded by the scorer.
    pub earned:          i64,
}

impl TaskReport {
    /// Report for a task nobody submitted a file for.
    pub fn unsubmitted(task: &DeclaredTask) -> Self {
        Self {
            number:          task.number,
            title:           task.title.clone(),
            possible:        task.points,
            test_case_count: task.tests.len(),
            status:          SubmissionStatus::Unsubmitted,
            compile:         None,
            outcomes:        Vec::new(),
            earned:          0,
        }
    }

    /// Report for a submitted task, before scoring.
    pub fn submitted(
        task: &DeclaredTask,
        compile: Option<CompileResult>,
        outcomes: Vec<TestOutcome>,
    ) -> Self {
        Self {
            status: SubmissionStatus::Submitted,
            compile,
            outcomes,
            ..Self::unsubmitted(task)
        }
    }

    /// Number of passing test cases.
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.passed()).count()
    }
}

/// Full result of grading one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GradingResult {
    /// One report per declared task, ordered by task number.
    pub tasks:          Vec<TaskReport>,
    /// Source files that did not resolve to any declared task.
    pub unrecognized:   Vec<SubmittedFile>,
    /// Sum of earned points.
    pub total_earned:   i64,
    /// Sum of declared points.
    pub total_possible: i64,
}

impl GradingResult {
    /// Whether every available point was earned.
    pub fn is_perfect(&self) -> bool {
        self.total_earned == self.total_possible
    }
}
