//! The process handle produced by a successful launch. It exclusively
//! owns the native process reference and up to three retained stream
//! ends, and is the only home of the terminated flag and the cached exit
//! status. The wait engine is the sole mutator of those two fields;
//! termination control never touches them.

use crate::{
    hooks,
    stream::{self, Direction},
};
use log::{debug, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use std::{fs::File, io, os::fd::OwnedFd};
use thiserror::Error;

/// Errors supervising a spawned process.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying wait primitive failed.
    #[error("Waiting for process to terminate failed: {0}")]
    Wait(Errno),

    /// Sending the termination signal failed.
    #[error("Failed to terminate process: {0}")]
    Kill(Errno),

    /// A zero-timeout poll found the process still running. This is the
    /// normal "try again" outcome, not an engine failure.
    #[error("Process still running")]
    StillRunning,

    /// The exit status was queried before termination was observed.
    #[error("Process has not yet finished")]
    Unfinished,

    /// A handle whose native reference was already transferred or
    /// released was used where a live one is required.
    #[error("Invalid process reference")]
    Invalid,

    /// The requested stream end was never created, or was already handed
    /// out.
    #[error("No such stream was created")]
    NoStream,

    /// A supervised process exited with a non-zero status.
    #[error("Error running '{program}': exit status {status}")]
    Failed {
        /// Diagnostic name of the failing program.
        program: String,
        /// Its individual exit status.
        status: i32,
    },

    /// Stream wrapping failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Exit status recorded when a process died to a signal or was reaped
/// behind our back; it never collides with a normal exit code.
const ABNORMAL_EXIT: i32 = -1;

/// A handle to one spawned process. Exactly one live native reference is
/// bound to it; each retained stream end can be handed out at most once,
/// after which its slot holds the absent sentinel and a second hand-off
/// is a no-op rather than a double-close.
pub struct Handle {
    /// Program name, for diagnostics only.
    name: String,

    /// The native process reference. `None` once transferred out,
    /// released, or reaped.
    pid: Option<Pid>,

    /// Retained write end of the child's standard input.
    stdin: Option<OwnedFd>,

    /// Retained read end of the child's standard output.
    stdout: Option<OwnedFd>,

    /// Retained read end of the child's standard error.
    stderr: Option<OwnedFd>,

    /// Terminal-state flag; transitions false to true, never back.
    terminated: bool,

    /// Cached exit status, meaningful only once terminated.
    exit: Option<i32>,

    /// Whether the process was launched detached from our group.
    detached: bool,
}

impl Handle {
    /// Bind a freshly launched process and its retained ends. Only the
    /// launcher constructs handles.
    pub(crate) fn new(
        name: String,
        pid: Pid,
        stdin: Option<OwnedFd>,
        stdout: Option<OwnedFd>,
        stderr: Option<OwnedFd>,
    ) -> Self {
        Self {
            name,
            pid: Some(pid),
            stdin,
            stdout,
            stderr,
            terminated: false,
            exit: None,
            detached: false,
        }
    }

    /// The record of a fire-and-forget detached launch: no native
    /// reference is retained and the state is already terminal.
    pub(crate) fn detached(name: String) -> Self {
        Self {
            name,
            pid: None,
            stdin: None,
            stdout: None,
            stderr: None,
            terminated: true,
            exit: None,
            detached: true,
        }
    }

    /// The program name this handle was launched with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The native process identifier, if still bound.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Whether a wait has observed the terminal state.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Whether this handle came from a detached launch.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// The cached exit status. Querying before termination signals
    /// [`Error::Unfinished`], never a stale or zero value. A detached or
    /// signal-killed process reports the abnormal sentinel.
    pub fn exit_code(&self) -> Result<i32, Error> {
        if !self.terminated {
            return Err(Error::Unfinished);
        }
        Ok(self.exit.unwrap_or(ABNORMAL_EXIT))
    }

    /// Transfer the retained input write end out. A second call returns
    /// `None`; the end is never closed twice.
    pub fn take_stdin(&mut self) -> Option<OwnedFd> {
        self.stdin.take()
    }

    /// Transfer the retained output read end out.
    pub fn take_stdout(&mut self) -> Option<OwnedFd> {
        self.stdout.take()
    }

    /// Transfer the retained error read end out.
    pub fn take_stderr(&mut self) -> Option<OwnedFd> {
        self.stderr.take()
    }

    /// Wrap the retained input end into a writable stream, transferring
    /// ownership out of the handle.
    pub fn stdin_stream(&mut self, nonblock: bool) -> Result<File, Error> {
        let fd = self.stdin.take().ok_or(Error::NoStream)?;
        Ok(stream::wrap(fd, Direction::Write, nonblock)?)
    }

    /// Wrap the retained output end into a readable stream.
    pub fn stdout_stream(&mut self, nonblock: bool) -> Result<File, Error> {
        let fd = self.stdout.take().ok_or(Error::NoStream)?;
        Ok(stream::wrap(fd, Direction::Read, nonblock)?)
    }

    /// Wrap the retained error end into a readable stream.
    pub fn stderr_stream(&mut self, nonblock: bool) -> Result<File, Error> {
        let fd = self.stderr.take().ok_or(Error::NoStream)?;
        Ok(stream::wrap(fd, Direction::Read, nonblock)?)
    }

    /// Transfer the native process reference out. The caller becomes
    /// responsible for the process; the handle's teardown turns into a
    /// no-op for it.
    pub fn detach(mut self) -> Option<Pid> {
        self.pid.take()
    }

    /// Wait for the process to terminate, or poll once when `hang` is
    /// false. On completion the terminal state and exit status are
    /// recorded and the status returned. A poll that finds the process
    /// running signals [`Error::StillRunning`].
    pub fn wait(&mut self, hang: bool) -> Result<i32, Error> {
        if self.terminated {
            return self.exit_code();
        }
        let Some(pid) = self.pid else {
            return Err(Error::Invalid);
        };

        let flags = if hang {
            None
        } else {
            Some(WaitPidFlag::WNOHANG)
        };
        loop {
            match hooks::blocking(|| waitpid(pid, flags)) {
                Ok(WaitStatus::StillAlive) => return Err(Error::StillRunning),
                Ok(WaitStatus::Exited(_, code)) => {
                    self.pid = None;
                    self.terminated = true;
                    self.exit = Some(code);
                    return Ok(code);
                }
                Ok(WaitStatus::Signaled(_, _, _)) => {
                    self.pid = None;
                    self.terminated = true;
                    self.exit = Some(ABNORMAL_EXIT);
                    return Ok(ABNORMAL_EXIT);
                }
                // Stopped/continued are not terminal states.
                Ok(_) => continue,
                Err(Errno::ECHILD) => {
                    // Reaped elsewhere; the status is lost.
                    self.pid = None;
                    self.terminated = true;
                    self.exit = Some(ABNORMAL_EXIT);
                    return Ok(ABNORMAL_EXIT);
                }
                Err(e) => return Err(Error::Wait(e)),
            }
        }
    }

    /// Forcibly end the process. The requested status is recorded in the
    /// diagnostic log; on this platform the process reports signal death
    /// instead. A handle with no live reference, or one already observed
    /// terminated, is a no-op. The terminal state is *not* updated here;
    /// a subsequent wait observes it, as termination is asynchronous
    /// relative to the request.
    pub fn kill(&mut self, status: i32) -> Result<(), Error> {
        if self.terminated {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        debug!(
            "terminating '{}' (pid {pid}) with requested status {status}",
            self.name
        );
        match hooks::blocking(|| kill(pid, Signal::SIGKILL)) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                self.pid = None;
                Ok(())
            }
            Err(e) => Err(Error::Kill(e)),
        }
    }

    /// Explicit teardown: a process still recorded as running is
    /// terminated and reaped so nothing outlives its handle; termination
    /// failure is logged and the discard proceeds regardless.
    pub fn release(mut self) {
        self.teardown();
    }

    /// Shared body of `release` and `Drop`. Safe to run twice; a handle
    /// without a live reference returns immediately.
    fn teardown(&mut self) {
        if self.terminated || self.pid.is_none() {
            return;
        }
        if let Err(e) = self.kill(1) {
            warn!("failed to terminate '{}': {e}", self.name);
        }
        if let Some(pid) = self.pid.take() {
            match hooks::blocking(|| waitpid(pid, None)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.terminated = true;
                    self.exit = Some(code);
                }
                Ok(_) | Err(Errno::ECHILD) => {
                    self.terminated = true;
                    self.exit = Some(ABNORMAL_EXIT);
                }
                Err(e) => warn!("failed to reap '{}': {e}", self.name),
            }
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Spawner, Stdio};
    use anyhow::Result;

    #[test]
    fn exit_status_is_cached() -> Result<()> {
        let mut handle = Spawner::new("true").spawn()?;
        assert_eq!(handle.wait(true)?, 0);
        assert!(handle.is_terminated());
        assert_eq!(handle.exit_code()?, 0);
        // A second wait reports the cached status.
        assert_eq!(handle.wait(true)?, 0);
        Ok(())
    }

    #[test]
    fn query_before_termination_is_unfinished() -> Result<()> {
        let mut handle = Spawner::new("sleep").arg("30").spawn()?;
        assert!(matches!(handle.exit_code(), Err(Error::Unfinished)));
        assert!(matches!(handle.wait(false), Err(Error::StillRunning)));
        assert!(matches!(handle.exit_code(), Err(Error::Unfinished)));
        handle.release();
        Ok(())
    }

    #[test]
    fn nonzero_status_is_reported() -> Result<()> {
        let mut handle = Spawner::new("sh").args(["-c", "exit 7"]).spawn()?;
        assert_eq!(handle.wait(true)?, 7);
        assert_eq!(handle.exit_code()?, 7);
        Ok(())
    }

    #[test]
    fn kill_does_not_mark_terminated() -> Result<()> {
        let mut handle = Spawner::new("sleep").arg("30").spawn()?;
        handle.kill(9)?;
        // Termination is asynchronous; the flag flips on the next wait.
        assert!(!handle.is_terminated());
        let status = handle.wait(true)?;
        assert!(handle.is_terminated());
        assert_ne!(status, 0);
        // Killing a terminated process is a no-op.
        handle.kill(9)?;
        Ok(())
    }

    #[test]
    fn release_of_terminated_handle_is_quiet() -> Result<()> {
        let mut handle = Spawner::new("true").spawn()?;
        let _ = handle.wait(true)?;
        handle.release();
        Ok(())
    }

    #[test]
    fn release_reaps_a_running_process() -> Result<()> {
        let handle = Spawner::new("sleep").arg("30").spawn()?;
        let pid = handle.pid().expect("live handle");
        handle.release();
        // The process must not outlive the call.
        assert!(matches!(kill(pid, None), Err(Errno::ESRCH)));
        Ok(())
    }

    #[test]
    fn stream_hand_off_is_single_shot() -> Result<()> {
        let mut handle = Spawner::new("true").stdout(Stdio::Piped).spawn()?;
        assert!(handle.take_stdout().is_some());
        assert!(handle.take_stdout().is_none());
        assert!(matches!(
            handle.stdout_stream(false),
            Err(Error::NoStream)
        ));
        let _ = handle.wait(true)?;
        Ok(())
    }

    #[test]
    fn detach_transfers_the_reference() -> Result<()> {
        let handle = Spawner::new("sleep").arg("30").spawn()?;
        let pid = handle.detach().expect("live handle");
        // The handle no longer owns the process; clean it up ourselves.
        kill(pid, Signal::SIGKILL)?;
        let _ = waitpid(pid, None)?;
        Ok(())
    }
}
