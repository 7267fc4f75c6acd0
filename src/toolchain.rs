#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::Path, time::Duration};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    compiler::Compiler,
    executor,
    types::{CompileResult, TestCase, TestOutcome},
};

/// Builds and runs submitted programs.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Compiles `source` into `output`. Paths under `workspace` and the
    /// output directory are hidden from the diagnostics. `Err` means the
    /// compiler could not be run.
    async fn compile(
        &self,
        source: &Path,
        output: &Path,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<CompileResult>;

    /// Runs a compiled program against one test case. `Err` means the run
    /// could not even be attempted.
    async fn execute(
        &self,
        executable: &Path,
        case: &TestCase,
        timeout: Duration,
    ) -> Result<TestOutcome>;
}

/// Compiles with a native C compiler and runs the results directly.
#[derive(Debug, Clone)]
pub struct NativeToolchain {
    /// Compiler invocation.
    compiler: Compiler,
}

impl NativeToolchain {
    /// Wraps a compiler invocation.
    pub fn new(compiler: Compiler) -> Self {
        Self { compiler }
    }
}

#[async_trait]
impl Toolchain for NativeToolchain {
    async fn compile(
        &self,
        source: &Path,
        output: &Path,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<CompileResult> {
        let mut hide = vec![workspace];
        if let Some(build_dir) = output.parent() {
            hide.push(build_dir);
        }
        if let Some(source_dir) = source.parent() {
            hide.push(source_dir);
        }
        self.compiler.compile(source, output, &hide, timeout).await
    }

    async fn execute(
        &self,
        executable: &Path,
        case: &TestCase,
        timeout: Duration,
    ) -> Result<TestOutcome> {
        Ok(executor::run(executable, case, timeout).await)
    }
}
