#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::{Context, Result};
use glob::{Pattern, glob};
use regex::Regex;

use crate::types::SubmittedFile;

/// Extensions, compared case-sensitively, that mark a file as C source.
const SOURCE_EXTENSIONS: [&str; 2] = ["c", "C"];

/// Filename patterns, tried in order. The first capture group is the task
/// number.
static TASK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^task[_\-\s]?0*(\d+)\.c$",
        r"(?i)^problem[_\-\s]?0*(\d+)\.c$",
        r"(?i)^zad(?:acha)?[_\-\s]?0*(\d+)\.c$",
        r"(?i)^0*(\d+)\.c$",
        r"(?i)^.*?[_\-]0*(\d+)\.c$",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("task patterns are valid regexes"))
    .collect()
});

/// Result of matching a filename against the task patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The filename names this task number.
    Resolved(u32),
    /// No pattern matched.
    Unresolved,
}

impl Resolution {
    /// The task number, if resolved.
    pub fn task(self) -> Option<u32> {
        match self {
            Resolution::Resolved(number) => Some(number),
            Resolution::Unresolved => None,
        }
    }
}

/// Whether `path` has a recognized C source extension.
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Matches a bare filename against the task patterns.
pub fn resolve(filename: &str) -> Resolution {
    if !is_source_file(Path::new(filename)) {
        return Resolution::Unresolved;
    }

    TASK_PATTERNS
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(filename)
                .and_then(|caps| caps.get(1))
                .and_then(|number| number.as_str().parse::<u32>().ok())
        })
        .map_or(Resolution::Unresolved, Resolution::Resolved)
}

/// Returns the task number a filename claims, if any.
pub fn classify(filename: &str) -> Option<u32> {
    resolve(filename).task()
}

/// Finds every C source file below `root`, sorted by name.
///
/// A missing `root` yields no files; the student simply submitted nothing
/// where it was expected.
pub fn discover(root: &Path) -> Result<Vec<SubmittedFile>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let root = root
        .to_str()
        .context("Could not convert submission directory to string")?;
    // Brackets and wildcards in the directory name are literal.
    let pattern = Path::new(&Pattern::escape(root)).join("**").join("*.[cC]");
    let pattern = pattern
        .to_str()
        .context("Could not convert glob pattern to string")?;

    let mut files: Vec<SubmittedFile> = glob(pattern)
        .context("Could not create glob")?
        .filter_map(Result::ok)
        .filter(|path| path.is_file() && is_source_file(path))
        .filter_map(|path: PathBuf| {
            let name = path.file_name()?.to_str()?.to_string();
            Some(SubmittedFile {
                task: classify(&name),
                name,
                path,
            })
        })
        .collect();

    files.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Files bound to declared tasks, and the ones that could not be bound.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Task number to the file submitted for it.
    pub bindings:     BTreeMap<u32, SubmittedFile>,
    /// Files with no usable task number, sorted by name.
    pub unrecognized: Vec<SubmittedFile>,
}

/// Binds files to tasks numbered `1..=task_count`.
///
/// Numbers outside that range are treated as unrecognized. When two files
/// claim the same task, the one with the smaller name wins and the other is
/// unrecognized.
pub fn resolve_all(files: Vec<SubmittedFile>, task_count: usize) -> Resolved {
    let mut resolved = Resolved::default();

    let mut files = files;
    files.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));

    for mut file in files {
        let in_range = file
            .task
            .filter(|&number| number >= 1 && (number as usize) <= task_count);

        match in_range {
            Some(number) if !resolved.bindings.contains_key(&number) => {
                resolved.bindings.insert(number, file);
            }
            _ => {
                file.task = None;
                resolved.unrecognized.push(file);
            }
        }
    }

    resolved
}
