#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
    time::timeout,
};

/// Drop guard that terminates a spawned child process unless it has been
/// awaited to completion.
///
/// On unix the child leads its own process group and the whole group is
/// killed, so helpers it started (the `cc1`/`as`/`ld` behind a compiler
/// driver, or whatever a test program forks) go with it.
struct ChildDropGuard(Option<Child>);

impl ChildDropGuard {
    /// Wraps the provided child process with the drop guard.
    fn new(child: Child) -> Self {
        Self(Some(child))
    }

    /// Returns a mutable reference to the underlying child process.
    fn child_mut(&mut self) -> Result<&mut Child> {
        self.0
            .as_mut()
            .context("child process already taken from guard")
    }

    /// Prevents the guard from killing the process on drop.
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for ChildDropGuard {
    fn drop(&mut self) {
        if let Some(child) = self.0.as_mut() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                let _ = nix::sys::signal::killpg(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
            let _ = child.start_kill();
        }
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct Collected {
    /// Exit status returned by the process.
    pub status: std::process::ExitStatus,
    /// Contents written to stdout.
    pub stdout: Vec<u8>,
    /// Contents written to stderr.
    pub stderr: Vec<u8>,
}

impl Collected {
    /// Exit code of the process, or `-1` when it was terminated by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// stdout followed by stderr, decoded permissively.
    pub fn combined_output(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// Outcome of waiting on a subprocess for a bounded amount of time.
#[derive(Debug)]
pub enum Bounded {
    /// The process exited on its own; everything it wrote is captured.
    Completed(Collected),
    /// The deadline passed first and the process was killed. Whatever it had
    /// written so far is discarded.
    TimedOut(Duration),
}

impl Bounded {
    /// Returns the collected output, or `None` if the process timed out.
    pub fn completed(self) -> Option<Collected> {
        match self {
            Bounded::Completed(collected) => Some(collected),
            Bounded::TimedOut(_) => None,
        }
    }
}

/// Describes how stdin should be wired for the spawned process.
#[derive(Debug)]
pub enum StdinSource {
    /// Attach nothing to stdin.
    Null,
    /// Write the provided bytes, then close stdin.
    Bytes(Vec<u8>),
}

/// Reads a child's output pipe to the end on its own task.
fn drain<R>(pipe: R, stream: &'static str) -> JoinHandle<Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        BufReader::new(pipe)
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("failed to read {stream}"))?;
        Ok(buf)
    })
}

/// Spawns a command, optionally feeds stdin, and collects stdout/stderr.
///
/// With a `deadline`, the child is killed once it elapses and
/// [`Bounded::TimedOut`] is returned. An `Err` means the process could not be
/// spawned or its pipes could not be read.
pub async fn run_collect(
    program: impl AsRef<OsStr>,
    args: &[OsString],
    stdin: StdinSource,
    cwd: Option<&Path>,
    env: &[(OsString, OsString)],
    deadline: Option<Duration>,
) -> Result<Bounded> {
    let program = program.as_ref();
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

    match &stdin {
        StdinSource::Null => {
            cmd.stdin(Stdio::null());
        }
        StdinSource::Bytes(_) => {
            cmd.stdin(Stdio::piped());
        }
    }

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    cmd.process_group(0);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut guard = ChildDropGuard::new(
        cmd.spawn()
            .with_context(|| format!("failed to spawn {}", program.to_string_lossy()))?,
    );

    if let StdinSource::Bytes(bytes) = stdin
        && let Some(mut handle) = guard.child_mut()?.stdin.take()
    {
        tokio::spawn(async move {
            if !bytes.is_empty() {
                let _ = handle.write_all(&bytes).await;
            }
            let _ = handle.shutdown().await;
        });
    }

    let child = guard.child_mut()?;
    let out_task = drain(child.stdout.take().context("missing stdout pipe")?, "stdout");
    let err_task = drain(child.stderr.take().context("missing stderr pipe")?, "stderr");

    let wait_future = async move {
        let mut guard = guard;
        let status = guard
            .child_mut()?
            .wait()
            .await
            .context("failed to wait on process")?;
        guard.disarm();
        let stdout = out_task.await.context("stdout task join error")??;
        let stderr = err_task.await.context("stderr task join error")??;
        Ok(Collected {
            status,
            stdout,
            stderr,
        })
    };

    match deadline {
        Some(limit) => match timeout(limit, wait_future).await {
            Ok(collected) => collected.map(Bounded::Completed),
            Err(_) => Ok(Bounded::TimedOut(limit)),
        },
        None => wait_future.await.map(Bounded::Completed),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn collects_both_streams_and_exit_code() {
        let bounded = run_collect(
            "sh",
            &sh("echo out; echo err 1>&2; exit 3"),
            StdinSource::Null,
            None,
            &[],
            Some(Duration::from_secs(5)),
        )
        .await
        .expect("spawn sh");

        let collected = bounded.completed().expect("finished in time");
        assert_eq!(collected.exit_code(), 3);
        assert_eq!(collected.combined_output(), "out\nerr\n");
    }

    #[tokio::test]
    async fn feeds_stdin_bytes() {
        let bounded = run_collect(
            "sh",
            &sh("read line; echo \"got $line\""),
            StdinSource::Bytes(b"ping\n".to_vec()),
            None,
            &[],
            Some(Duration::from_secs(5)),
        )
        .await
        .expect("spawn sh");

        let collected = bounded.completed().expect("finished in time");
        assert_eq!(String::from_utf8_lossy(&collected.stdout), "got ping\n");
    }

    #[tokio::test]
    async fn deadline_reports_timed_out() {
        let bounded = run_collect(
            "sh",
            &sh("exec sleep 5"),
            StdinSource::Null,
            None,
            &[],
            Some(Duration::from_millis(200)),
        )
        .await
        .expect("spawn sh");

        assert!(matches!(bounded, Bounded::TimedOut(_)));
    }

    /// Whether `pid` has exited. A zombie awaiting its reaper counts as gone.
    #[cfg(target_os = "linux")]
    fn gone(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with(['Z', 'X'])),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn deadline_kills_grandchildren() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pidfile = dir.path().join("pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pidfile.display());

        let bounded = run_collect(
            "sh",
            &sh(&script),
            StdinSource::Null,
            None,
            &[],
            Some(Duration::from_millis(300)),
        )
        .await
        .expect("spawn sh");
        assert!(matches!(bounded, Bounded::TimedOut(_)));

        let pid = std::fs::read_to_string(&pidfile).expect("pid written");
        let pid = pid.trim();
        let mut waited = Duration::ZERO;
        while !gone(pid) && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        assert!(gone(pid), "background sleep {pid} survived the deadline");
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let result = run_collect(
            "/definitely/not/a/program",
            &[],
            StdinSource::Null,
            None,
            &[],
            None,
        )
        .await;

        assert!(result.is_err());
    }
}
