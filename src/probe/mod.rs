//! Process-isolated filesystem prober.
//!
//! A `stat` against a dead NFS mount can block in an uninterruptible syscall
//! forever. No thread-level timeout can preempt that, so every probe attempt
//! runs in its own child process which is killed when its deadline passes.
//!
//! ```text
//! available(path, timeout, retries)
//!   └─ attempt 1..=retries, each with timeout / retries
//!        spawn `stat <path>` ─ poll every 10ms ─┬─ exited  → status.success()
//!                                               └─ deadline → kill, wait, false
//! ```

use serde::Deserialize;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Interval between child status polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Program run by each probe attempt; the storage path is appended last.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProbeCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments placed before the storage path.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ProbeCommand {
    fn default() -> Self {
        Self::new("stat")
    }
}

impl ProbeCommand {
    /// Creates a command running `program <path>`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Sets the arguments placed before the storage path.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self, path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

/// How a single probe attempt ended.
#[derive(Debug)]
enum Attempt {
    Exited(ExitStatus),
    TimedOut { pid: u32 },
    Failed,
}

impl Attempt {
    fn succeeded(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

/// Runs availability checks in killable child processes.
#[derive(Debug, Clone, Default)]
pub struct IsolatedProbe {
    command: ProbeCommand,
}

impl IsolatedProbe {
    /// Creates a prober running `command` per attempt.
    #[must_use]
    pub const fn new(command: ProbeCommand) -> Self {
        Self { command }
    }

    /// Returns the probe command.
    #[must_use]
    pub const fn command(&self) -> &ProbeCommand {
        &self.command
    }

    /// Returns `true` if `path` could be probed within `timeout`.
    ///
    /// The timeout is split evenly across `retries` attempts (at least one).
    /// Later attempts only run while earlier ones failed.
    pub fn available(&self, path: &Path, timeout: Duration, retries: u32) -> bool {
        let attempts = retries.max(1);
        let partial_timeout = timeout / attempts;

        for attempt in 1..=attempts {
            let outcome = self.timed_check(path, partial_timeout);
            if outcome.succeeded() {
                return true;
            }
            tracing::debug!(
                path = %path.display(),
                attempt,
                attempts,
                outcome = ?outcome,
                "Storage probe attempt failed"
            );
        }

        false
    }

    fn timed_check(&self, path: &Path, timeout: Duration) -> Attempt {
        let mut child = match self.command.command(path).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    program = %self.command.program,
                    error = %e,
                    "Failed to spawn storage probe"
                );
                return Attempt::Failed;
            },
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Attempt::Exited(status),
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to poll storage probe");
                    kill_and_reap(&mut child);
                    return Attempt::Failed;
                },
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }

        let pid = child.id();
        kill_and_reap(&mut child);
        Attempt::TimedOut { pid }
    }
}

/// Kills the child and blocks until it is reaped, so no zombie is left.
fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(pid = child.id(), error = %e, "Storage probe already gone");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = child.id(), error = %e, "Failed to reap storage probe");
    }
}
