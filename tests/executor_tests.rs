#![cfg(unix)]

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use classgrade::{
    executor,
    types::{TestCase, TestOutcome},
};

/// Writes an executable shell script standing in for a compiled program.
fn program(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn case(input: &str, expected: &str) -> TestCase {
    TestCase::builder().input(input).expected(expected).build()
}

#[tokio::test]
async fn output_is_compared_after_normalization() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = program(
        dir.path(),
        "sum",
        r#"read a b; printf '\n  %s  \n\n' "$((a + b))""#,
    );

    let outcome = executor::run(&exe, &case("2 3\n", "5\n"), Duration::from_secs(5)).await;
    assert_eq!(outcome, TestOutcome::Passed);
}

#[tokio::test]
async fn wrong_output_is_a_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = program(dir.path(), "wrong", "echo 4");

    let outcome = executor::run(&exe, &case("2 2", "5"), Duration::from_secs(5)).await;
    assert_eq!(outcome, TestOutcome::Mismatch {
        input:    "2 2".into(),
        expected: "5".into(),
        actual:   "4".into(),
    });
}

#[tokio::test]
async fn non_zero_exit_fails_even_with_matching_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = program(dir.path(), "crashy", "echo 5; exit 3");

    let outcome = executor::run(&exe, &case("", "5"), Duration::from_secs(5)).await;
    assert!(matches!(outcome, TestOutcome::Mismatch { ref actual, .. } if actual == "5"));
}

#[tokio::test]
async fn slow_programs_time_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = program(dir.path(), "slow", "exec sleep 5");

    let started = std::time::Instant::now();
    let outcome = executor::run(&exe, &case("x", "y"), Duration::from_millis(300)).await;
    assert_eq!(outcome, TestOutcome::Timeout { input: "x".into() });
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn missing_executable_is_an_execution_error() {
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = executor::run(
        &dir.path().join("does-not-exist"),
        &case("", ""),
        Duration::from_secs(1),
    )
    .await;
    assert!(matches!(outcome, TestOutcome::ExecutionError { .. }));
}
