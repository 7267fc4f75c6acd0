//! # classgrade
//!
//! Grades C programming assignments submitted as pull requests: the patch is
//! applied to a working copy, every submitted file is compiled and run
//! against its task's test cases, and a markdown report is posted back.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Timeout-bounded child processes
pub mod process;
/// Data shared between grading stages
pub mod types;

/// Environment-driven settings
pub mod config;

/// Maps submitted filenames to task numbers
pub mod resolver;
/// Invokes the C compiler
pub mod compiler;
/// Runs compiled programs against test cases
pub mod executor;
/// Compiler and runner behind one interface
pub mod toolchain;
/// Turns test outcomes into points
pub mod scorer;
/// Markdown report and merge decision
pub mod report;

/// Git working copies
pub mod workspace;
/// Store and pull request platform interfaces
pub mod host;
/// GitHub implementation of the pull request platform
pub mod github;
/// JSON-file implementation of the store
pub mod catalogue;

/// Orchestrates grading jobs
pub mod engine;

pub use config::GraderConfig;
pub use engine::{GradingEngine, GradingError, Stage, grade_tree};
pub use types::{DeclaredTask, GradingResult, TaskReport, TestCase, TestOutcome};
