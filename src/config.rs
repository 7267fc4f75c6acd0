#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::{Context, Result};
use bon::Builder;

use crate::compiler::Compiler;

/// Default warning and language-standard flags for the C compiler.
pub const DEFAULT_CFLAGS: &str = "-Wall -Wextra -std=c11";

/// Settings shared by every grading job.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into), on(PathBuf, into))]
pub struct GraderConfig {
    /// Remote repository every working copy is cloned from.
    #[builder(default)]
    repository_url:  String,
    /// Branch review branches start from and cleanup returns to.
    #[builder(default = String::from("master"))]
    default_branch:  String,
    /// Directory holding one working copy per submission.
    #[builder(default = PathBuf::from("workspaces"))]
    workspace_root:  PathBuf,
    /// C compiler executable.
    #[builder(default = String::from("gcc"))]
    compiler:        String,
    /// Flags placed before the source file.
    #[builder(default = split_flags(DEFAULT_CFLAGS))]
    compiler_flags:  Vec<String>,
    /// Flags placed after the source file.
    #[builder(default = vec![String::from("-lm")])]
    link_flags:      Vec<String>,
    /// Upper bound for one compilation.
    #[builder(default = Duration::from_secs(30))]
    compile_timeout: Duration,
    /// Upper bound for one test case run.
    #[builder(default = Duration::from_secs(1))]
    test_timeout:    Duration,
    /// Upper bound for one git command.
    #[builder(default = Duration::from_secs(120))]
    git_timeout:     Duration,
    /// Delete a working copy once its job has been cleaned up, instead of
    /// keeping the clone for the next resubmission.
    #[builder(default)]
    prune_workspaces: bool,
    /// Token for the hosting platform API.
    github_token:    Option<String>,
    /// Base URL of the hosting platform API.
    #[builder(default = String::from("https://api.github.com"))]
    github_api:      String,
}

impl GraderConfig {
    /// Reads the configuration from `CLASSGRADE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let compiler = match var("CLASSGRADE_CC") {
            Some(cc) => cc,
            None => which::which("gcc")
                .or_else(|_| which::which("cc"))
                .map(|path| path.display().to_string())
                .unwrap_or_else(|_| "gcc".to_string()),
        };

        Ok(Self::builder()
            .repository_url(var("CLASSGRADE_REPOSITORY_URL").unwrap_or_default())
            .default_branch(var("CLASSGRADE_DEFAULT_BRANCH").unwrap_or_else(|| "master".into()))
            .workspace_root(
                var("CLASSGRADE_WORKSPACE_ROOT").unwrap_or_else(|| "workspaces".into()),
            )
            .compiler(compiler)
            .compiler_flags(split_flags(
                &var("CLASSGRADE_CFLAGS").unwrap_or_else(|| DEFAULT_CFLAGS.into()),
            ))
            .link_flags(split_flags(&var("CLASSGRADE_LDFLAGS").unwrap_or_else(|| "-lm".into())))
            .compile_timeout(read_timeout_secs("CLASSGRADE_COMPILE_TIMEOUT_SECS", 30))
            .test_timeout(read_timeout_secs("CLASSGRADE_TEST_TIMEOUT_SECS", 1))
            .git_timeout(read_timeout_secs("CLASSGRADE_GIT_TIMEOUT_SECS", 120))
            .prune_workspaces(
                var("CLASSGRADE_PRUNE_WORKSPACES")
                    .is_some_and(|value| matches!(value.as_str(), "1" | "true" | "yes")),
            )
            .maybe_github_token(var("CLASSGRADE_GITHUB_TOKEN"))
            .github_api(
                var("CLASSGRADE_GITHUB_API").unwrap_or_else(|| "https://api.github.com".into()),
            )
            .build())
    }

    /// Returns the remote repository URL.
    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    /// Returns the default branch name.
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Returns the directory holding the working copies.
    pub fn workspace_root(&self) -> &std::path::Path {
        &self.workspace_root
    }

    /// Returns the compiler invocation described by this configuration.
    pub fn compiler(&self) -> Compiler {
        Compiler::new(
            self.compiler.clone(),
            self.compiler_flags.clone(),
            self.link_flags.clone(),
        )
    }

    /// Returns the compile timeout.
    pub fn compile_timeout(&self) -> Duration {
        self.compile_timeout
    }

    /// Returns the per test case timeout.
    pub fn test_timeout(&self) -> Duration {
        self.test_timeout
    }

    /// Returns the git command timeout.
    pub fn git_timeout(&self) -> Duration {
        self.git_timeout
    }

    /// Whether working copies are deleted after their job.
    pub fn prune_workspaces(&self) -> bool {
        self.prune_workspaces
    }

    /// Returns the hosting platform token, if configured.
    pub fn github_token(&self) -> Option<&str> {
        self.github_token.as_deref()
    }

    /// Returns the hosting platform API base URL.
    pub fn github_api(&self) -> &str {
        &self.github_api
    }

    /// Fails unless everything needed to grade pull requests is set.
    pub fn require_remote(&self) -> Result<()> {
        anyhow::ensure!(
            !self.repository_url.is_empty(),
            "CLASSGRADE_REPOSITORY_URL must be set to grade pull requests"
        );
        self.github_token
            .as_ref()
            .map(|_| ())
            .context("CLASSGRADE_GITHUB_TOKEN must be set to grade pull requests")
    }
}

/// Shared configuration handle used by the binary.
#[derive(Clone)]
pub struct ConfigHandle(Arc<GraderConfig>);

impl std::ops::Deref for ConfigHandle {
    type Target = GraderConfig;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<GraderConfig>>>> = OnceLock::new();

/// Ensure the global configuration has been read from the environment and
/// return a handle to it.
pub fn ensure_initialized() -> Result<ConfigHandle> {
    let slot = CONFIG_SLOT.get_or_init(|| Mutex::new(None));
    let mut guard = slot.lock().expect("config slot poisoned");
    if let Some(cfg) = guard.as_ref() {
        return Ok(ConfigHandle(Arc::clone(cfg)));
    }

    let cfg = Arc::new(GraderConfig::from_env()?);
    *guard = Some(Arc::clone(&cfg));
    Ok(ConfigHandle(cfg))
}

/// Splits a flag string on whitespace.
fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    std::env::var(env)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
