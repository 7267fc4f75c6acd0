#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # classgrade
//!
//! Grades C assignments submitted as pull requests.
//!
//! Settings come from `CLASSGRADE_*` environment variables, optionally
//! loaded from a `.env` file. `CLASSGRADE_LOG` takes a tracing filter
//! directive such as `info` or `classgrade=debug`.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use bpaf::*;
use classgrade::{
    GradingEngine,
    catalogue::FileCatalogue,
    config::{self, ConfigHandle},
    github::GitHubClient,
    grade_tree, report, resolver,
    toolchain::NativeToolchain,
    workspace::GitWorkspace,
};
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, util::SubscriberInitExt};

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade pull request submissions from the catalogue
    Grade {
        /// Catalogue file
        catalogue:   PathBuf,
        /// Submissions to grade
        submissions: Vec<u64>,
    },
    /// Grade a local directory against an assignment
    Check {
        /// Catalogue file
        catalogue:  PathBuf,
        /// Assignment whose tasks are used
        assignment: u64,
        /// Directory holding the C files
        dir:        PathBuf,
    },
    /// Print the task each filename resolves to
    Classify(Vec<String>),
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    /// parses the catalogue path
    fn catalogue_path() -> impl Parser<PathBuf> {
        long("catalogue")
            .short('c')
            .help("Path to the JSON catalogue of submissions, assignments and students")
            .argument::<PathBuf>("PATH")
    }

    let catalogue = catalogue_path();
    let submissions = positional::<u64>("ID").help("Submission id").some("at least one id");
    let grade = construct!(Cmd::Grade {
        catalogue,
        submissions
    })
    .to_options()
    .command("grade")
    .help("Grade submissions and report on their pull requests");

    let catalogue = catalogue_path();
    let assignment = long("assignment")
        .short('a')
        .help("Assignment id")
        .argument::<u64>("ID");
    let dir = positional::<PathBuf>("DIR").help("Directory with the submitted C files");
    let check = construct!(Cmd::Check {
        catalogue,
        assignment,
        dir
    })
    .to_options()
    .command("check")
    .help("Grade a local directory and print the report");

    let names = positional::<String>("FILENAME").help("File name").many();
    let classify = construct!(Cmd::Classify(names))
        .to_options()
        .command("classify")
        .help("Show which task each filename belongs to");

    let cmd = construct!([grade, check, classify]);

    cmd.to_options()
        .descr("Grades C assignments submitted as pull requests")
        .run()
}

/// Grades `submissions` concurrently. Returns whether all of them succeeded.
async fn grade(config: ConfigHandle, catalogue: PathBuf, submissions: Vec<u64>) -> Result<bool> {
    config.require_remote()?;
    let token = config.github_token().context("CLASSGRADE_GITHUB_TOKEN is not set")?;

    let engine = GradingEngine::builder()
        .config((*config).clone())
        .store(Arc::new(FileCatalogue::load(&catalogue).await?))
        .host(Arc::new(GitHubClient::new(config.github_api(), token)?))
        .workspace(Arc::new(GitWorkspace::new(config.git_timeout())))
        .toolchain(Arc::new(NativeToolchain::new(config.compiler())))
        .build();

    let mut all_ok = true;
    for (id, outcome) in engine.grade_many(&submissions).await {
        match outcome {
            Ok(result) => info!(
                submission = id,
                earned = result.total_earned,
                possible = result.total_possible,
                "graded"
            ),
            Err(e) => {
                all_ok = false;
                error!(submission = id, error = %e, "grading failed");
            }
        }
    }
    Ok(all_ok)
}

/// Grades a local directory and prints the report.
async fn check(config: ConfigHandle, catalogue: PathBuf, assignment: u64, dir: PathBuf) -> Result<()> {
    let tasks = FileCatalogue::load(&catalogue).await?.tasks_for(assignment)?;
    let toolchain = NativeToolchain::new(config.compiler());
    let result = grade_tree(&toolchain, &config, &dir, &dir, &tasks).await?;
    println!("{}", report::render(&result));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);
    let filter_layer =
        EnvFilter::try_from_env("CLASSGRADE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    let cmd = options();

    match cmd {
        Cmd::Grade {
            catalogue,
            submissions,
        } => {
            let config = config::ensure_initialized()?;
            if !grade(config, catalogue, submissions).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Cmd::Check {
            catalogue,
            assignment,
            dir,
        } => check(config::ensure_initialized()?, catalogue, assignment, dir).await?,
        Cmd::Classify(names) => {
            for name in names {
                match resolver::classify(&name) {
                    Some(task) => println!("{name}\t{task}"),
                    None => println!("{name}\t-"),
                }
            }
        }
    };

    Ok(ExitCode::SUCCESS)
}
