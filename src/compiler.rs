#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{borrow::Cow, ffi::OsString, path::Path, time::Duration};

use anyhow::Result;
use shell_escape::escape;
use tracing::{debug, warn};

use crate::{
    process::{self, Bounded, StdinSource},
    types::CompileResult,
};

/// Exit code recorded when the compiler had to be killed.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Native C toolchain invocation with fixed flags.
#[derive(Debug, Clone)]
pub struct Compiler {
    /// Compiler executable.
    program:    String,
    /// Warning and language-standard flags placed before the sources.
    flags:      Vec<String>,
    /// Flags placed after the sources (libraries).
    link_flags: Vec<String>,
}

impl Compiler {
    /// Creates a compiler invocation.
    pub fn new(program: impl Into<String>, flags: Vec<String>, link_flags: Vec<String>) -> Self {
        Self {
            program: program.into(),
            flags,
            link_flags,
        }
    }

    /// Shell command line that compiles `source` into `output`.
    ///
    /// `exec` replaces the shell, so the compiler driver leads the process
    /// group that a timeout kills.
    pub fn command_line(&self, source: &Path, output: &Path) -> String {
        let mut words: Vec<Cow<'_, str>> = vec![
            Cow::Borrowed("exec"),
            escape(Cow::Borrowed(self.program.as_str())),
        ];
        words.extend(self.flags.iter().map(|flag| escape(Cow::Borrowed(flag.as_str()))));
        words.push(Cow::Borrowed("-o"));
        words.push(escape(output.to_string_lossy()));
        words.push(escape(source.to_string_lossy()));
        words.extend(
            self.link_flags
                .iter()
                .map(|flag| escape(Cow::Borrowed(flag.as_str()))),
        );
        words.join(" ")
    }

    /// Compiles `source` into `output`, waiting at most `timeout`.
    ///
    /// Diagnostics have every prefix in `hide` removed. A timeout is reported
    /// like any other failed compilation. `Err` means the compiler could not
    /// be launched at all.
    pub async fn compile(
        &self,
        source: &Path,
        output: &Path,
        hide: &[&Path],
        timeout: Duration,
    ) -> Result<CompileResult> {
        let line = self.command_line(source, output);
        debug!(command = %line, "compiling");

        let args: Vec<OsString> = vec!["-c".into(), line.into()];
        let bounded = process::run_collect(
            "sh",
            &args,
            StdinSource::Null,
            output.parent(),
            &[],
            Some(timeout),
        )
        .await?;

        let result = match bounded {
            Bounded::Completed(collected) => {
                let exit_code = collected.exit_code();
                CompileResult {
                    exit_code,
                    output: strip_prefixes(&collected.combined_output(), hide),
                    artifact: (exit_code == 0 && output.is_file()).then(|| output.to_path_buf()),
                }
            }
            Bounded::TimedOut(limit) => {
                warn!(source = %source.display(), ?limit, "compiler timed out");
                CompileResult {
                    exit_code: KILLED_EXIT_CODE,
                    output:    format!(
                        "Compilation timed out after {} seconds.",
                        limit.as_secs_f64()
                    ),
                    artifact:  None,
                }
            }
        };

        Ok(result)
    }
}

/// Removes absolute directory prefixes from compiler output so students never
/// see the server's layout.
pub fn strip_prefixes(text: &str, prefixes: &[&Path]) -> String {
    let mut prefixes: Vec<String> = prefixes
        .iter()
        .map(|prefix| prefix.to_string_lossy().trim_end_matches('/').to_string())
        .filter(|prefix| !prefix.is_empty())
        .collect();
    // Longest first so nested directories are removed whole.
    prefixes.sort_by_key(|prefix| std::cmp::Reverse(prefix.len()));

    prefixes.iter().fold(text.to_string(), |acc, prefix| {
        acc.replace(&format!("{prefix}/"), "").replace(prefix.as_str(), "")
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn command_line_escapes_paths() {
        let compiler = Compiler::new(
            "gcc",
            vec!["-Wall".into(), "-std=c11".into()],
            vec!["-lm".into()],
        );
        let line = compiler.command_line(
            &PathBuf::from("/ws/my dir/task1.c"),
            &PathBuf::from("/build/task-1"),
        );
        assert_eq!(line, "exec gcc -Wall -std=c11 -o /build/task-1 '/ws/my dir/task1.c' -lm");
    }

    #[test]
    fn strips_nested_prefixes() {
        let text = "/srv/ws/submission-1/11b/2/17/task1.c:3:5: warning: unused variable";
        let stripped = strip_prefixes(
            text,
            &[Path::new("/srv/ws/submission-1"), Path::new("/srv/ws/submission-1/11b/2/17/")],
        );
        assert_eq!(stripped, "task1.c:3:5: warning: unused variable");
    }
}
