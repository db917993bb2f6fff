//! Worker process ownership
//!
//! A `WorkerProcess` owns one spawned worker and its pipes. It is never shared:
//! the request/reply channel owns it for the duration of one call, the script
//! launcher for the lifetime of one console session. Dropping it kills the
//! worker's process group if the worker has not exited on its own.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use super::stderr_buffer::{spawn_stderr_reader, StderrCapture};
use crate::error::{BridgeError, Result};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Hides the console window a Windows child would otherwise get
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

// Unix-specific process control using libc
#[cfg(unix)]
mod unix_process {
    use libc::{c_int, pid_t, ESRCH};

    /// Send a signal to a process group (negative PID targets the group)
    pub fn kill_process_group(pgid: u32, signal: c_int) -> Result<(), &'static str> {
        // Safety: kill() is a plain syscall with no memory safety concerns
        let rc = unsafe { libc::kill(-(pgid as pid_t), signal) };
        if rc == 0 {
            Ok(())
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::ESRCH => Err("No such process group"),
                libc::EPERM => Err("Permission denied"),
                _ => Err("Unknown error"),
            }
        }
    }

    /// Signal 0 checks for existence; EPERM still means alive
    pub fn process_group_alive(pgid: u32) -> bool {
        // Safety: kill() with signal 0 only checks existence
        let rc = unsafe { libc::kill(-(pgid as pid_t), 0) };
        if rc == 0 {
            true
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            errno != ESRCH
        }
    }

    pub const SIGTERM: c_int = libc::SIGTERM;
    pub const SIGKILL: c_int = libc::SIGKILL;
}

/// Tracks the worker PID so the whole process group can be torn down
#[derive(Debug)]
pub struct ProcessHandle {
    /// Process ID (also the PGID since workers are spawned with process_group(0))
    pub(crate) pid: u32,
    label: String,
    /// Set once the process was killed or observed to exit
    pub(crate) finished: bool,
}

impl ProcessHandle {
    pub fn new(pid: u32, label: String) -> Self {
        debug!(pid, worker = %label, "ProcessHandle created");
        Self {
            pid,
            label,
            finished: false,
        }
    }

    /// Kill the process group with graceful escalation (Unix)
    ///
    /// SIGTERM first, then SIGKILL if the group is still alive after the
    /// grace period. A no-op once the handle is finished, so a reused PID is
    /// never signalled.
    pub fn kill(&mut self) {
        /// Grace period after SIGTERM before escalating to SIGKILL (milliseconds)
        const TERM_GRACE_MS: u64 = 250;
        const POLL_INTERVAL_MS: u64 = 25;

        if self.finished {
            return;
        }
        self.finished = true;

        #[cfg(unix)]
        {
            use unix_process::{kill_process_group, process_group_alive, SIGKILL, SIGTERM};

            let pgid = self.pid;
            match kill_process_group(pgid, SIGTERM) {
                Ok(()) => debug!(pgid, worker = %self.label, "SIGTERM sent"),
                Err("No such process group") => {
                    debug!(pgid, "Process group already exited");
                    return;
                }
                Err(e) => warn!(pgid, error = e, "Failed to send SIGTERM"),
            }

            let start = Instant::now();
            while start.elapsed() < Duration::from_millis(TERM_GRACE_MS) {
                if !process_group_alive(pgid) {
                    debug!(pgid, "Process group terminated after SIGTERM");
                    return;
                }
                thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }

            warn!(pgid, worker = %self.label, "Worker ignored SIGTERM, escalating to SIGKILL");
            if let Err(e) = kill_process_group(pgid, SIGKILL) {
                debug!(pgid, error = e, "SIGKILL failed");
            }
        }

        #[cfg(not(unix))]
        {
            // The owning WorkerProcess follows up with Child::kill()
            debug!(pid = self.pid, worker = %self.label, "Process marked as killed");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

/// A spawned worker with piped stdin/stdout/stderr
pub struct WorkerProcess {
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<StderrCapture>,
    child: Child,
    handle: ProcessHandle,
    /// Reusable line buffer for read_line
    line_buffer: Vec<u8>,
}

impl WorkerProcess {
    /// Launch `executable` with `args`, all three standard streams piped
    #[instrument(skip_all, fields(executable = %executable.as_ref().to_string_lossy()))]
    pub fn spawn<S: AsRef<OsStr>>(executable: S, args: &[String]) -> Result<WorkerProcess> {
        let executable = executable.as_ref();
        let label = args
            .last()
            .cloned()
            .unwrap_or_else(|| executable.to_string_lossy().into_owned());

        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so the worker and anything it starts can be killed together
        #[cfg(unix)]
        command.process_group(0);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt as _;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|source| {
            error!(error = %source, executable = %executable.to_string_lossy(), "Worker spawn failed");
            BridgeError::Launch {
                executable: executable.to_string_lossy().into_owned(),
                source,
            }
        })?;

        let pid = child.id();
        info!(pid, worker = %label, "Worker spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(stderr, label.clone()));

        Ok(WorkerProcess {
            stdin,
            stdout,
            stderr,
            child,
            handle: ProcessHandle::new(pid, label),
            line_buffer: Vec::with_capacity(1024),
        })
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid
    }

    /// Write `text` plus a newline and flush so the worker sees it immediately
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker input already closed")
        })?;
        writeln!(stdin, "{}", text)?;
        stdin.flush()?;
        Ok(())
    }

    /// Signal end-of-input to the worker. Safe to call more than once.
    pub fn close_input(&mut self) {
        if self.stdin.take().is_some() {
            debug!(pid = self.handle.pid, "Worker input closed");
        }
    }

    /// Block until a full line is available; `None` at end of stream
    ///
    /// The trailing line terminator is stripped. Bytes that are not UTF-8
    /// (a worker printing in the platform code page) become U+FFFD.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let stdout = self.stdout.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker output was detached")
        })?;
        self.line_buffer.clear();
        match stdout.read_until(b'\n', &mut self.line_buffer)? {
            0 => Ok(None),
            _ => Ok(Some(
                String::from_utf8_lossy(&self.line_buffer)
                    .trim_end_matches(['\r', '\n'])
                    .to_string(),
            )),
        }
    }

    /// Hand stdout to a background thread that logs each line
    ///
    /// Used for long-running workers whose stdout nobody reads, so the pipe
    /// never fills up and stalls them.
    pub fn drain_stdout_to_log(&mut self) {
        if let Some(stdout) = self.stdout.take() {
            let label = self.handle.label.clone();
            thread::spawn(move || {
                for line in stdout.split(b'\n') {
                    match line {
                        Ok(line) => {
                            let line = String::from_utf8_lossy(&line);
                            debug!(target: "WORKER", worker = %label, "{}", line.trim_end())
                        }
                        Err(_) => break,
                    }
                }
            });
        }
    }

    /// Recent stderr lines, waiting up to `timeout` for the reader to catch up
    pub fn stderr_contents(&self, timeout: Duration) -> String {
        self.stderr
            .as_ref()
            .map(|capture| capture.get_contents_with_timeout(timeout))
            .unwrap_or_default()
    }

    /// Non-blocking exit check
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait up to `timeout` for the worker to exit and reap it
    ///
    /// Returns the exit code (-1 when killed by a signal), or `None` if the
    /// worker is still running when the timeout elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            if let Some(status) = self.child.try_wait()? {
                self.handle.finished = true;
                let code = status.code().unwrap_or(-1);
                debug!(pid = self.handle.pid, code, "Worker exited");
                return Ok(Some(code));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(poll_interval);
        }
    }

    /// Kill the worker and its process group, then reap it
    pub fn kill(&mut self) {
        if self.handle.finished {
            return;
        }
        info!(pid = self.handle.pid, "Killing worker");
        self.handle.kill();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.close_input();
        if let Ok(Some(_)) = self.child.try_wait() {
            self.handle.finished = true;
            return;
        }
        self.kill();
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.handle.pid)
            .field("label", &self.handle.label)
            .field("input_open", &self.stdin.is_some())
            .finish()
    }
}
