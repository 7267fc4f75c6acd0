#![cfg(unix)]

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use classgrade::{
    GraderConfig,
    compiler::KILLED_EXIT_CODE,
    grade_tree,
    toolchain::{NativeToolchain, Toolchain},
    types::{DeclaredTask, SubmissionStatus, TestCase, TestOutcome},
};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("c")
        .join(name)
}

/// Finds a C compiler, or `None` to skip the test.
fn c_compiler() -> Option<String> {
    ["gcc", "cc"]
        .into_iter()
        .find_map(|name| which::which(name).ok())
        .map(|path| path.display().to_string())
}

fn config(cc: &str) -> GraderConfig {
    GraderConfig::builder()
        .compiler(cc)
        .compile_timeout(Duration::from_secs(60))
        .test_timeout(Duration::from_secs(2))
        .build()
}

/// Copies a fixture into `dir` under `name`.
fn submit(dir: &Path, fixture_name: &str, name: &str) -> PathBuf {
    let target = dir.join(name);
    std::fs::copy(fixture(fixture_name), &target).expect("copy fixture");
    target
}

fn sum_task(number: u32) -> DeclaredTask {
    DeclaredTask::builder()
        .number(number)
        .title("Sum")
        .points(10)
        .tests([
            TestCase::builder().input("1 2").expected("3").build(),
            TestCase::builder().input("-4 4\n").expected("0\n").build(),
        ])
        .build()
}

#[tokio::test]
async fn clean_source_compiles_without_diagnostics() {
    let Some(cc) = c_compiler() else {
        eprintln!("no C compiler found, skipping");
        return;
    };
    let work = tempfile::tempdir().expect("tempdir");
    let build = tempfile::tempdir().expect("tempdir");
    let source = submit(work.path(), "sum.c", "task1.c");

    let toolchain = NativeToolchain::new(config(&cc).compiler());
    let result = toolchain
        .compile(&source, &build.path().join("task-1"), work.path(), Duration::from_secs(60))
        .await
        .expect("compiler runs");

    assert!(result.succeeded(), "{}", result.output);
    assert!(!result.has_diagnostics());
}

#[tokio::test]
async fn diagnostics_hide_server_paths() {
    let Some(cc) = c_compiler() else {
        eprintln!("no C compiler found, skipping");
        return;
    };
    let work = tempfile::tempdir().expect("tempdir");
    let build = tempfile::tempdir().expect("tempdir");
    let warned = submit(work.path(), "sum_warning.c", "task1.c");
    let broken = submit(work.path(), "broken.c", "task2.c");
    let toolchain = NativeToolchain::new(config(&cc).compiler());

    let result = toolchain
        .compile(&warned, &build.path().join("task-1"), work.path(), Duration::from_secs(60))
        .await
        .expect("compiler runs");
    assert!(result.succeeded());
    assert!(result.has_diagnostics());
    assert!(result.output.contains("unused"), "{}", result.output);

    let result = toolchain
        .compile(&broken, &build.path().join("task-2"), work.path(), Duration::from_secs(60))
        .await
        .expect("compiler runs");
    assert!(!result.succeeded());
    assert_ne!(result.exit_code, 0);
    assert!(result.artifact.is_none());
    assert!(result.output.contains("task2.c"), "{}", result.output);

    let workdir = work.path().display().to_string();
    assert!(!result.output.contains(&workdir), "{}", result.output);
}

#[tokio::test]
async fn compile_timeout_is_a_failed_compilation() {
    let Some(cc) = c_compiler() else {
        eprintln!("no C compiler found, skipping");
        return;
    };
    let work = tempfile::tempdir().expect("tempdir");
    let build = tempfile::tempdir().expect("tempdir");
    let source = submit(work.path(), "sum.c", "task1.c");

    let result = NativeToolchain::new(config(&cc).compiler())
        .compile(&source, &build.path().join("task-1"), work.path(), Duration::from_millis(1))
        .await
        .expect("compiler launches");

    assert_eq!(result.exit_code, KILLED_EXIT_CODE);
    assert!(!result.succeeded());
    assert!(result.output.contains("timed out"));
}

#[tokio::test]
async fn directory_is_graded_end_to_end() {
    let Some(cc) = c_compiler() else {
        eprintln!("no C compiler found, skipping");
        return;
    };
    let work = tempfile::tempdir().expect("tempdir");
    submit(work.path(), "sum.c", "task1.c");
    submit(work.path(), "sum_warning.c", "task_2.c");
    submit(work.path(), "spin.c", "task3.c");
    submit(work.path(), "hypot.c", "task4.c");
    submit(work.path(), "sum.c", "task9.c");
    submit(work.path(), "broken.c", "scratch.c");

    let spin = DeclaredTask::builder()
        .number(3)
        .points(4)
        .tests([TestCase::builder().expected("never").build()])
        .build();
    let hypot = DeclaredTask::builder()
        .number(4)
        .points(6)
        .tests([TestCase::builder().input("3 4").expected("5.0").build()])
        .build();
    let missing = DeclaredTask::builder()
        .number(5)
        .points(3)
        .tests([TestCase::builder().expected("").build()])
        .build();
    let tasks = vec![sum_task(1), sum_task(2), spin, hypot, missing];

    let config = config(&cc);
    let toolchain = NativeToolchain::new(config.compiler());
    let result = grade_tree(&toolchain, &config, work.path(), work.path(), &tasks)
        .await
        .expect("graded");

    let earned: Vec<i64> = result.tasks.iter().map(|t| t.earned).collect();
    // Task 2 passes both cases but pays one point per pass for the warning.
    assert_eq!(earned, vec![10, 8, 0, 6, 0]);
    assert_eq!(result.total_earned, 24);
    assert_eq!(result.total_possible, 33);

    assert!(matches!(result.tasks[2].outcomes[..], [TestOutcome::Timeout { .. }]));
    assert_eq!(result.tasks[4].status, SubmissionStatus::Unsubmitted);

    let unrecognized: Vec<&str> = result.unrecognized.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(unrecognized, vec!["scratch.c", "task9.c"]);
}
