#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt::{self, Write};

use itertools::Itertools;
use similar::{Algorithm, ChangeTag, utils::diff_unicode_words};
use tabled::{Table, Tabled, settings::Style};

use crate::{
    host::PullRequestState,
    types::{GradingResult, SubmissionStatus, TaskReport, TestOutcome},
};

/// Comment posted when the working copy could not be prepared.
pub const WORKSPACE_FAILURE_COMMENT: &str =
    "Git error while preparing to review this pull request. A teacher has been notified; \
     please do not close or modify the pull request in the meantime.";

/// Comment posted when the pull request author is not a registered student.
pub const UNKNOWN_STUDENT_COMMENT: &str =
    "This account is not registered as a student in this course, so the pull request cannot be \
     graded and has been closed. Please register your account and open a new pull request.";

/// One row of the summary table.
#[derive(Tabled)]
struct SummaryRow {
    /// Task number and title.
    #[tabled(rename = "Task")]
    task:   String,
    /// Submission/compile state.
    #[tabled(rename = "Status")]
    status: String,
    /// earned/possible.
    #[tabled(rename = "Points")]
    points: String,
}

/// Points as shown to students; negative scores display as zero.
fn shown(points: i64) -> i64 {
    points.max(0)
}

/// Heading text for a task.
fn task_heading(task: &TaskReport) -> String {
    if task.title.trim().is_empty() {
        format!("Task {}", task.number)
    } else {
        format!("Task {}: {}", task.number, task.title.trim())
    }
}

/// Short state of a task for the summary table.
fn task_status(task: &TaskReport) -> &'static str {
    match (&task.status, &task.compile) {
        (SubmissionStatus::Unsubmitted, _) => "not submitted",
        (SubmissionStatus::Submitted, None) => "not graded",
        (SubmissionStatus::Submitted, Some(compile)) if !compile.succeeded() => "compile error",
        (SubmissionStatus::Submitted, Some(compile)) if compile.has_diagnostics() => {
            "compiled with warnings"
        }
        (SubmissionStatus::Submitted, Some(_)) => "compiled",
    }
}

/// Wraps `text` in a fenced block, `(empty)` when there is nothing to show.
fn fenced(text: &str) -> String {
    let body = if text.is_empty() { "(empty)" } else { text };
    format!("```\n{}\n```\n", body.trim_end())
}

/// Inline word diff with `[-removed-]` and `{+added+}` markers.
fn word_diff(expected: &str, actual: &str) -> String {
    diff_unicode_words(Algorithm::Patience, expected, actual)
        .into_iter()
        .map(|(tag, value)| match tag {
            ChangeTag::Equal => value.to_string(),
            ChangeTag::Delete => format!("[-{value}-]"),
            ChangeTag::Insert => format!("{{+{value}+}}"),
        })
        .collect()
}

/// Renders one test case subsection.
fn render_outcome(out: &mut String, index: usize, outcome: &TestOutcome) -> fmt::Result {
    let number = index + 1;
    match outcome {
        TestOutcome::Passed => writeln!(out, "#### Test {number}: passed\n"),
        TestOutcome::Mismatch {
            input,
            expected,
            actual,
        } => {
            writeln!(out, "#### Test {number}: failed\n")?;
            writeln!(out, "Input:\n{}", fenced(input))?;
            writeln!(out, "Expected:\n{}", fenced(expected))?;
            writeln!(out, "Actual:\n{}", fenced(actual))?;
            if !expected.is_empty() && !actual.is_empty() {
                writeln!(out, "Difference:\n{}", fenced(&word_diff(expected, actual)))?;
            }
            Ok(())
        }
        TestOutcome::Timeout { input } => {
            writeln!(out, "#### Test {number}: timed out\n")?;
            writeln!(
                out,
                "The program did not finish in time and was stopped.\n\nInput:\n{}",
                fenced(input)
            )
        }
        TestOutcome::ExecutionError { message } => {
            writeln!(out, "#### Test {number}: could not be run\n")?;
            writeln!(out, "{}", fenced(message))
        }
    }
}

/// Renders one task section.
fn render_task(out: &mut String, task: &TaskReport) -> fmt::Result {
    writeln!(
        out,
        "## {} ({}/{} points)\n",
        task_heading(task),
        shown(task.earned),
        task.possible
    )?;

    match task.status {
        SubmissionStatus::Unsubmitted => return writeln!(out, "Status: not submitted\n"),
        SubmissionStatus::Submitted => writeln!(out, "Status: submitted\n")?,
    }

    match &task.compile {
        None => writeln!(out, "The submission could not be compiled by the grader.\n")?,
        Some(compile) => {
            if compile.has_diagnostics() {
                writeln!(out, "### Compiler output\n\n{}", fenced(&compile.output))?;
            }
            if !compile.succeeded() {
                writeln!(out, "Compilation failed, so no tests were run.\n")?;
            }
        }
    }

    if !task.outcomes.is_empty() {
        writeln!(
            out,
            "### Tests ({}/{} passed)\n",
            task.passed_count(),
            task.test_case_count
        )?;
        for (index, outcome) in task.outcomes.iter().enumerate() {
            render_outcome(out, index, outcome)?;
        }
    }
    Ok(())
}

/// Writes the report body below the title.
fn render_body(out: &mut String, result: &GradingResult) -> fmt::Result {
    let tasks: Vec<&TaskReport> = result.tasks.iter().sorted_by_key(|task| task.number).collect();

    let rows = tasks.iter().map(|task| SummaryRow {
        task:   task_heading(task),
        status: task_status(task).to_string(),
        points: format!("{}/{}", shown(task.earned), task.possible),
    });
    let mut table = Table::new(rows);
    table.with(Style::markdown());
    writeln!(out, "{table}\n")?;

    for task in tasks {
        render_task(out, task)?;
    }

    if !result.unrecognized.is_empty() {
        writeln!(out, "## Unrecognized files\n")?;
        writeln!(
            out,
            "These files do not match any task of the assignment and were not graded:\n"
        )?;
        for file in result.unrecognized.iter().sorted_by(|a, b| a.name.cmp(&b.name)) {
            writeln!(out, "- `{}`", file.name)?;
        }
        out.push('\n');
    }

    writeln!(out, "## Overall\n")?;
    writeln!(
        out,
        "Total: {}/{} points",
        shown(result.total_earned),
        result.total_possible
    )
}

/// Renders the full report posted to the pull request.
pub fn render(result: &GradingResult) -> String {
    let mut out = String::from("# Grading report\n\n");
    // Writing into a String cannot fail.
    let _ = render_body(&mut out, result);
    out
}

/// Whether a graded pull request should be merged: full marks, not merged
/// yet, and free of conflicts.
pub fn decide_merge(total_earned: i64, total_possible: i64, state: &PullRequestState) -> bool {
    total_earned == total_possible && !state.merged && state.mergeable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_diff_marks_changes() {
        assert_eq!(word_diff("1 2 3", "1 5 3"), "1 [-2-]{+5+} 3");
    }

    #[test]
    fn merge_needs_full_marks_and_a_clean_open_pull_request() {
        let open = PullRequestState {
            merged:    false,
            mergeable: true,
        };
        assert!(decide_merge(20, 20, &open));
        assert!(!decide_merge(19, 20, &open));
        assert!(!decide_merge(20, 20, &PullRequestState {
            merged:    true,
            mergeable: true,
        }));
        assert!(!decide_merge(20, 20, &PullRequestState {
            merged:    false,
            mergeable: false,
        }));
    }
}
