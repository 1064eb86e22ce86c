//! Running the frontend as an isolated child process.
//!
//! Each child gets its own process group, `/dev/null` for stdin, and a
//! private temporary file for its combined stdout/stderr, so concurrent units
//! never share a stream. Timeouts and interrupts terminate the whole group
//! (SIGTERM, then SIGKILL after a grace period) and the child is always
//! reaped before [`ToolRunner::run`] returns.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::invocation::Invocation;
use crate::types::ExitDetail;

const MIN_POLL: Duration = Duration::from_millis(1);
const MAX_POLL: Duration = Duration::from_millis(25);
const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(100);

/// What one tool run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit: ExitDetail,
    pub duration: Duration,
    /// Combined stdout and stderr.
    pub output: Vec<u8>,
}

/// Spawn, capture, and wait-or-kill for one invocation.
pub trait ToolRunner: Send + Sync {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> ToolOutput;
}

/// [`ToolRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl ProcessRunner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> ToolOutput {
        let failed = |message: String| ToolOutput {
            exit: ExitDetail::Error(message),
            duration: Duration::ZERO,
            output: Vec::new(),
        };

        let capture = match tempfile::tempfile() {
            Ok(f) => f,
            Err(e) => return failed(format!("cannot create capture file: {e}")),
        };
        let (stdout, stderr) = match (capture.try_clone(), capture.try_clone()) {
            (Ok(out), Ok(err)) => (out, err),
            (Err(e), _) | (_, Err(e)) => return failed(format!("cannot share capture file: {e}")),
        };

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let start = Instant::now();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ToolOutput {
                    exit: ExitDetail::Error(format!(
                        "cannot spawn {}: {e}",
                        invocation.program.display()
                    )),
                    duration: start.elapsed(),
                    output: Vec::new(),
                };
            }
        };
        drop(command);

        let mut guard = GroupGuard::new(child, self.kill_grace);
        let (exit, duration) = guard.wait(start, timeout, cancel);
        drop(guard);

        ToolOutput {
            exit,
            duration,
            output: read_capture(capture),
        }
    }
}

fn read_capture(mut capture: File) -> Vec<u8> {
    let mut output = Vec::new();
    let read = capture
        .seek(SeekFrom::Start(0))
        .and_then(|_| capture.read_to_end(&mut output));
    if let Err(e) = read {
        warn!("failed to read captured output: {e}");
    }
    output
}

/// Owns a child that leads its own process group; reaps it on drop.
struct GroupGuard {
    child: Child,
    pgid: i32,
    grace: Duration,
    reaped: bool,
}

impl GroupGuard {
    fn new(child: Child, grace: Duration) -> Self {
        let pgid = child.id() as i32;
        Self {
            child,
            pgid,
            grace,
            reaped: false,
        }
    }

    /// Wait for exit, the timeout, or cancellation, whichever comes first.
    fn wait(
        &mut self,
        start: Instant,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> (ExitDetail, Duration) {
        let mut poll = MIN_POLL;
        loop {
            match self.leader_exited() {
                Ok(true) => {
                    let elapsed = start.elapsed();
                    // Helpers the frontend forked must not outlive the unit.
                    self.signal_group(KILL);
                    let exit = match self.child.wait() {
                        Ok(status) => exit_detail(status),
                        Err(e) => ExitDetail::Error(format!("wait failed: {e}")),
                    };
                    self.reaped = true;
                    return (exit, elapsed);
                }
                Ok(false) => {}
                Err(e) => {
                    self.stop();
                    return (ExitDetail::Error(format!("wait failed: {e}")), start.elapsed());
                }
            }

            let elapsed = start.elapsed();
            if let Some(limit) = timeout
                && elapsed >= limit
            {
                debug!(pgid = self.pgid, "timeout after {:?}, terminating", elapsed);
                self.stop();
                return (ExitDetail::TimedOut, start.elapsed());
            }
            if cancel.is_cancelled() {
                debug!(pgid = self.pgid, "cancelled, terminating");
                self.stop();
                return (ExitDetail::Interrupted, start.elapsed());
            }

            let mut nap = poll;
            if let Some(limit) = timeout {
                nap = nap.min(limit.saturating_sub(elapsed)).max(MIN_POLL);
            }
            std::thread::sleep(nap);
            poll = (poll * 2).min(MAX_POLL);
        }
    }

    /// Terminate the whole group and reap the child.
    fn stop(&mut self) {
        if self.reaped {
            return;
        }
        self.signal_group(TERM);
        let deadline = Instant::now() + self.grace;
        loop {
            match self.leader_exited() {
                Ok(true) => break,
                Ok(false) if Instant::now() >= deadline => break,
                Ok(false) => std::thread::sleep(MIN_POLL * 5),
                Err(_) => break,
            }
        }
        self.signal_group(KILL);
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }

    /// Whether the leader has exited, without reaping it. While the leader
    /// is an unreaped zombie its pid, and so the group id, cannot be reused.
    #[cfg(unix)]
    fn leader_exited(&mut self) -> std::io::Result<bool> {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                self.pgid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        if rc == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(info.si_signo != 0)
    }

    #[cfg(not(unix))]
    fn leader_exited(&mut self) -> std::io::Result<bool> {
        self.child.try_wait().map(|status| status.is_some())
    }

    #[cfg(unix)]
    fn signal_group(&mut self, signal: i32) {
        unsafe {
            libc::killpg(self.pgid, signal);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, signal: i32) {
        if signal == KILL && !self.reaped {
            let _ = self.child.kill();
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.stop();
        }
    }
}

#[cfg(unix)]
const TERM: i32 = libc::SIGTERM;
#[cfg(unix)]
const KILL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
const TERM: i32 = 15;
#[cfg(not(unix))]
const KILL: i32 = 9;

fn exit_detail(status: ExitStatus) -> ExitDetail {
    if let Some(code) = status.code() {
        return ExitDetail::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitDetail::Signal(signal);
        }
    }
    ExitDetail::Error(format!("unrecognized exit status: {status}"))
}
