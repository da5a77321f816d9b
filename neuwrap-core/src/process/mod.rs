//! Subprocess runner for long-running, occasionally interactive commands.
//!
//! Commands run through the platform shell. Output is mirrored to the
//! caller's terminal (unless quiet), captured into a bounded buffer, and
//! scanned for confirmation prompts which are answered automatically.

pub mod classifier;

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use classifier::{DefaultPromptClassifier, PromptClassifier};

/// Maximum characters kept from a child's combined output.
pub const MAX_CAPTURE_CHARS: usize = 8000;

/// Written to stdin whenever a prompt is detected.
pub const CONFIRM_TOKEN: &str = "y\n";

const READ_CHUNK_BYTES: usize = 4096;

/// Where a child's output is mirrored while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mirror {
    /// stdout to stdout, stderr to stderr.
    #[default]
    Inherit,
    /// Both streams to stderr, leaving stdout to the caller.
    Stderr,
}

impl Mirror {
    fn target(self, stream: Stream) -> Stream {
        match self {
            Self::Inherit => stream,
            Self::Stderr => Stream::Stderr,
        }
    }
}

// ============================================================================
// Options and Output
// ============================================================================

/// How a command should be run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resolve successfully (with a warning) on non-zero exit or timeout.
    pub allow_failure: bool,
    /// Bytes written to stdin right after spawning.
    pub input: Option<Vec<u8>>,
    /// Kill the process if it runs longer than this.
    pub timeout: Option<Duration>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Do not mirror output to the terminal.
    pub quiet: bool,
}

impl RunOptions {
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

/// Result of a command that resolved successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code, `None` when the process was killed on timeout.
    pub exit_code: Option<i32>,
    /// The first [`MAX_CAPTURE_CHARS`] characters of stdout and stderr.
    pub output: String,
    /// Whether output beyond the capture limit was dropped.
    pub truncated: bool,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell command lines. Implemented by [`ShellRunner`] and by test fakes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, options: RunOptions) -> Result<RunOutput>;
}

// ============================================================================
// Capture Buffer
// ============================================================================

/// Keeps the first `limit` characters pushed into it.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    text: String,
    chars: usize,
    limit: usize,
    truncated: bool,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        for c in chunk.chars() {
            if self.chars >= self.limit {
                self.truncated = true;
                return;
            }
            self.text.push(c);
            self.chars += 1;
        }
    }

    pub fn char_count(&self) -> usize {
        self.chars
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

// ============================================================================
// Shell Runner
// ============================================================================

/// Spawns commands through `sh -c` (or `cmd /C` on Windows).
#[derive(Clone)]
pub struct ShellRunner {
    classifier: Arc<dyn PromptClassifier>,
    mirror: Mirror,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShellRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellRunner")
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::with_classifier(DefaultPromptClassifier)
    }

    pub fn with_classifier(classifier: impl PromptClassifier + 'static) -> Self {
        Self {
            classifier: Arc::new(classifier),
            mirror: Mirror::Inherit,
        }
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn mirror(&self) -> Mirror {
        self.mirror
    }
}

/// Returns the platform shell and its "run this string" flag.
pub(crate) fn platform_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, options: RunOptions) -> Result<RunOutput> {
        let (shell, shell_arg) = platform_shell();

        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg).arg(command);

        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Own process group, so a timeout kill also reaches whatever the
        // shell spawned.
        #[cfg(unix)]
        {
            use nix::unistd::{setpgid, Pid};
            unsafe {
                cmd.pre_exec(|| {
                    setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(std::io::Error::from)
                });
            }
        }

        // Headless output
        cmd.env("NO_COLOR", "1");
        cmd.env("CLICOLOR", "0");

        debug!(command, working_dir = ?options.working_dir, timeout = ?options.timeout, "Spawning command");

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.to_string(),
            source,
        })?;

        let mut session = Session {
            stdin: child.stdin.take(),
            capture: CaptureBuffer::new(MAX_CAPTURE_CHARS),
            classifier: self.classifier.as_ref(),
            quiet: options.quiet,
            mirror: self.mirror,
        };

        if let Some(input) = &options.input {
            session.write_stdin(input).await;
        }

        let outcome = session.drive(&mut child, options.timeout).await;

        // Closed on every path before resolving.
        session.close_stdin();
        let truncated = session.capture.is_truncated();
        let output = session.capture.into_string();

        finish(command, &options, outcome, output, truncated)
    }
}

/// How a session ended.
#[derive(Debug)]
enum Outcome {
    Exited(i32),
    TimedOut,
}

fn finish(
    command: &str,
    options: &RunOptions,
    outcome: Outcome,
    output: String,
    truncated: bool,
) -> Result<RunOutput> {
    match outcome {
        Outcome::Exited(0) => Ok(RunOutput {
            exit_code: Some(0),
            output,
            truncated,
            timed_out: false,
        }),
        Outcome::Exited(code) if options.allow_failure => {
            warn!(command, code, "Command failed, continuing");
            Ok(RunOutput {
                exit_code: Some(code),
                output,
                truncated,
                timed_out: false,
            })
        }
        Outcome::Exited(code) => Err(Error::CommandFailed {
            command: command.to_string(),
            code,
            output,
        }),
        Outcome::TimedOut => {
            let timeout = options.timeout.unwrap_or_default();
            if options.allow_failure {
                warn!(command, ?timeout, "Command timed out, continuing");
                Ok(RunOutput {
                    exit_code: None,
                    output,
                    truncated,
                    timed_out: true,
                })
            } else {
                Err(Error::CommandTimedOut {
                    command: command.to_string(),
                    timeout,
                    output,
                })
            }
        }
    }
}

/// State for one spawned process.
struct Session<'a> {
    stdin: Option<ChildStdin>,
    capture: CaptureBuffer,
    classifier: &'a dyn PromptClassifier,
    quiet: bool,
    mirror: Mirror,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Session<'_> {
    /// Pumps stdout/stderr until both close and the child has exited, or
    /// until the deadline passes.
    async fn drive(&mut self, child: &mut Child, timeout: Option<Duration>) -> Outcome {
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = [0u8; READ_CHUNK_BYTES];
        let mut err_buf = [0u8; READ_CHUNK_BYTES];
        let mut status: Option<std::io::Result<ExitStatus>> = None;

        let deadline = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            if stdout.is_none() && stderr.is_none() {
                if let Some(status) = status.take() {
                    return Outcome::Exited(exit_code(status));
                }
            }

            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf) => match read {
                    Ok(0) | Err(_) => stdout = None,
                    Ok(n) => self.handle_chunk(Stream::Stdout, &out_buf[..n]).await,
                },
                read = read_chunk(&mut stderr, &mut err_buf) => match read {
                    Ok(0) | Err(_) => stderr = None,
                    Ok(n) => self.handle_chunk(Stream::Stderr, &err_buf[..n]).await,
                },
                exited = child.wait(), if status.is_none() => {
                    status = Some(exited);
                }
                _ = &mut deadline => {
                    warn!("Deadline reached, killing child process");
                    kill_tree(child).await;
                    return Outcome::TimedOut;
                }
            }
        }
    }

    async fn handle_chunk(&mut self, stream: Stream, bytes: &[u8]) {
        if !self.quiet {
            let mirrored = match self.mirror.target(stream) {
                Stream::Stdout => mirror(tokio::io::stdout(), bytes).await,
                Stream::Stderr => mirror(tokio::io::stderr(), bytes).await,
            };
            if let Err(e) = mirrored {
                debug!(?stream, "Failed to mirror output: {}", e);
            }
        }

        let text = String::from_utf8_lossy(bytes);
        self.capture.push(&text);

        if self.classifier.is_prompt(&text) {
            debug!(?stream, "Prompt detected, sending confirmation");
            self.write_stdin(CONFIRM_TOKEN.as_bytes()).await;
        }
    }

    async fn write_stdin(&mut self, bytes: &[u8]) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };

        let written = async {
            stdin.write_all(bytes).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            debug!("stdin closed by child: {}", e);
            self.stdin = None;
        }
    }

    fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn mirror<W>(mut writer: W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Kills the child's whole process group, then the child itself.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!("Failed to kill process group {}: {}", pid, e);
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Failed to kill child: {}", e);
    }
}

fn exit_code(status: std::io::Result<ExitStatus>) -> i32 {
    status.ok().and_then(|s| s.code()).unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_buffer_keeps_prefix() {
        let mut buffer = CaptureBuffer::new(5);
        buffer.push("abc");
        buffer.push("defgh");
        assert_eq!(buffer.as_str(), "abcde");
        assert_eq!(buffer.char_count(), 5);
        assert!(buffer.is_truncated());
    }

    #[test]
    fn test_capture_buffer_counts_chars_not_bytes() {
        let mut buffer = CaptureBuffer::new(3);
        buffer.push("äöüß");
        assert_eq!(buffer.as_str(), "äöü");
    }

    #[test]
    fn test_capture_buffer_never_exceeds_limit() {
        let mut buffer = CaptureBuffer::new(MAX_CAPTURE_CHARS);
        let line = "x".repeat(999);
        for _ in 0..50 {
            buffer.push(&line);
            assert!(buffer.char_count() <= MAX_CAPTURE_CHARS);
        }
        assert_eq!(buffer.as_str().chars().count(), MAX_CAPTURE_CHARS);
    }

    #[tokio::test]
    async fn test_run_success_captures_output() {
        let runner = ShellRunner::new();
        let out = runner
            .run("echo hello", RunOptions::default().quiet())
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.output.contains("hello"));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        let runner = ShellRunner::new();
        let out = runner
            .run("echo oops 1>&2", RunOptions::default().quiet())
            .await
            .unwrap();
        assert!(out.output.contains("oops"));
    }

    #[tokio::test]
    async fn test_run_failure_is_error() {
        let runner = ShellRunner::new();
        let err = runner
            .run("exit 3", RunOptions::default().quiet())
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { code, .. } => assert_eq!(code, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_failure_allowed() {
        let runner = ShellRunner::new();
        let out = runner
            .run("exit 3", RunOptions::default().quiet().allow_failure())
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_kills_process() {
        let runner = ShellRunner::new();
        let started = std::time::Instant::now();
        let err = runner
            .run(
                "echo started; exec sleep 30",
                RunOptions::default()
                    .quiet()
                    .timeout(Duration::from_millis(300)),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            Error::CommandTimedOut { output, .. } => assert!(output.contains("started")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_kills_background_children() {
        let temp = tempfile::TempDir::new().unwrap();
        let ticks = temp.path().join("ticks");
        let command = format!(
            "( while true; do echo tick >> '{}'; sleep 0.1; done ) & wait",
            ticks.display()
        );

        let err = ShellRunner::new()
            .run(
                &command,
                RunOptions::default()
                    .quiet()
                    .timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimedOut { .. }));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let len = || std::fs::metadata(&ticks).map(|m| m.len()).unwrap_or(0);
        let after_kill = len();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(len(), after_kill, "background loop survived the timeout");
    }

    #[test]
    fn test_mirror_target() {
        assert!(matches!(Mirror::Inherit.target(Stream::Stdout), Stream::Stdout));
        assert!(matches!(Mirror::Inherit.target(Stream::Stderr), Stream::Stderr));
        assert!(matches!(Mirror::Stderr.target(Stream::Stdout), Stream::Stderr));
        assert_eq!(ShellRunner::new().mirror(), Mirror::Inherit);
        assert_eq!(
            ShellRunner::new().with_mirror(Mirror::Stderr).mirror(),
            Mirror::Stderr
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_mirror_still_captures_stdout() {
        let runner = ShellRunner::new().with_mirror(Mirror::Stderr);
        let out = runner
            .run("echo report-line; echo oops 1>&2", RunOptions::default())
            .await
            .unwrap();
        assert!(out.output.contains("report-line"));
        assert!(out.output.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_allowed_resolves() {
        let runner = ShellRunner::new();
        let out = runner
            .run(
                "exec sleep 30",
                RunOptions::default()
                    .quiet()
                    .allow_failure()
                    .timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_answers_prompt() {
        let runner = ShellRunner::new();
        let out = runner
            .run(
                "printf 'Continue? (y/n) '; read answer; echo \"answer=$answer\"",
                RunOptions::default()
                    .quiet()
                    .timeout(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert!(out.output.contains("answer=y"), "output: {}", out.output);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_forwards_initial_input() {
        let runner = ShellRunner::new();
        let out = runner
            .run(
                "read line; echo \"got=$line\"",
                RunOptions::default()
                    .quiet()
                    .input("hello\n")
                    .timeout(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert!(out.output.contains("got=hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_bounds_noisy_output() {
        let runner = ShellRunner::new();
        let out = runner
            .run(
                "i=0; while [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done",
                RunOptions::default().quiet(),
            )
            .await
            .unwrap();
        assert_eq!(out.output.chars().count(), MAX_CAPTURE_CHARS);
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn test_run_in_working_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "x").unwrap();
        let list = if cfg!(windows) { "dir /b" } else { "ls" };

        let runner = ShellRunner::new();
        let out = runner
            .run(list, RunOptions::default().quiet().working_dir(temp.path()))
            .await
            .unwrap();
        assert!(out.output.contains("marker.txt"));
    }
}
