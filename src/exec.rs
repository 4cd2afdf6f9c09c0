//! External command execution.
//!
//! Handles spawning shell processes, capturing output and enforcing
//! per-invocation timeouts. A timed-out or missing command is a normal
//! result here, never an error: the collection loop records the
//! disposition and moves on.

use std::io::Read;
use std::process::{Command as ProcessCommand, Stdio};
use std::time::{Duration, Instant};

/// Default bound on how long a single external command may run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Exit code `sh -c` reports when the command could not be found.
const NOT_FOUND_EXIT_CODE: i32 = 127;

/// How a finished (or terminated) external command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// The command ran to completion with the given exit code.
    Exited(i32),
    /// The command was killed by a signal.
    Signaled,
    /// The command exceeded its timeout and was terminated.
    TimedOut,
    /// The command was not found on the host.
    NotFound,
}

impl ExitDisposition {
    /// Whether the command completed successfully.
    pub fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for ExitDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited {code}"),
            Self::Signaled => f.write_str("signaled"),
            Self::TimedOut => f.write_str("timed out"),
            Self::NotFound => f.write_str("not found"),
        }
    }
}

/// Captured result of a single external command.
#[derive(Debug)]
pub struct CommandOutcome {
    /// The command line that was executed.
    pub cmdline: String,
    /// How the command ended.
    pub status: ExitDisposition,
    /// Combined stdout/stderr output.
    pub output: String,
    /// Wall-clock runtime.
    pub runtime: Duration,
}

impl CommandOutcome {
    /// Whether the command completed successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs external commands through the platform shell.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Timeout applied when a call does not specify its own.
    pub default_timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self { default_timeout: DEFAULT_TIMEOUT }
    }
}

impl CommandRunner {
    /// Create a runner with the default timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `cmdline` via `sh -c`, capturing combined output.
    ///
    /// Blocks until the command exits or the timeout elapses. A timeout
    /// kills the child and yields [`ExitDisposition::TimedOut`]; exit
    /// code 127 is reported as [`ExitDisposition::NotFound`].
    pub fn run(
        &self,
        cmdline: &str,
        timeout: Option<Duration>,
    ) -> std::io::Result<CommandOutcome> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let start = Instant::now();

        let mut child = ProcessCommand::new("sh")
            .arg("-c")
            .arg(cmdline)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes off-thread so a chatty command cannot deadlock
        // against a full pipe buffer while we poll for exit.
        let stdout_handle = std::thread::spawn(move || read_to_string_lossy(stdout));
        let stderr_handle = std::thread::spawn(move || read_to_string_lossy(stderr));

        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if start.elapsed() >= timeout {
                timed_out = true;
                // Best effort: the child may have exited in the window
                // between try_wait and kill.
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(Duration::from_millis(25));
        };

        let mut output = stdout_handle.join().unwrap_or_default();
        let errout = stderr_handle.join().unwrap_or_default();
        if !errout.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&errout);
        }

        let runtime = start.elapsed();
        let disposition = if timed_out {
            ExitDisposition::TimedOut
        } else {
            match status.and_then(|s| s.code()) {
                Some(NOT_FOUND_EXIT_CODE) => ExitDisposition::NotFound,
                Some(code) => ExitDisposition::Exited(code),
                None => ExitDisposition::Signaled,
            }
        };

        tracing::debug!(
            cmdline,
            status = %disposition,
            runtime_ms = runtime.as_millis() as u64,
            "external command finished"
        );

        Ok(CommandOutcome { cmdline: cmdline.to_string(), status: disposition, output, runtime })
    }
}

fn read_to_string_lossy<R: Read>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}
