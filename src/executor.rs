#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::Path, time::Duration};

use tracing::debug;

use crate::{
    process::{self, Bounded, StdinSource},
    types::{TestCase, TestOutcome},
};

/// Canonical form used for output comparison: every line trimmed, blank
/// lines dropped, the rest joined with single spaces.
pub fn normalize(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `executable` with the case's input on stdin and classifies the
/// result. Never fails: launch problems become
/// [`TestOutcome::ExecutionError`].
pub async fn run(executable: &Path, case: &TestCase, timeout: Duration) -> TestOutcome {
    let bounded = process::run_collect(
        executable,
        &[],
        StdinSource::Bytes(case.input.clone().into_bytes()),
        executable.parent(),
        &[],
        Some(timeout),
    )
    .await;

    match bounded {
        Err(e) => {
            debug!(executable = %executable.display(), error = %e, "could not run program");
            TestOutcome::ExecutionError {
                message: format!("{e:#}"),
            }
        }
        Ok(Bounded::TimedOut(_)) => TestOutcome::Timeout {
            input: case.input.clone(),
        },
        Ok(Bounded::Completed(collected)) => {
            let actual = normalize(&String::from_utf8_lossy(&collected.stdout));
            let expected = normalize(&case.expected);

            if collected.status.success() && actual == expected {
                TestOutcome::Passed
            } else {
                TestOutcome::Mismatch {
                    input: case.input.clone(),
                    expected,
                    actual,
                }
            }
        }
    }
}
