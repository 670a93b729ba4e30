//! Observing and signalling container processes.
//!
//! The launcher is detached from the `create` invocation, so later
//! invocations cannot `waitpid` it. Exit is observed through a pidfd, which
//! works for any process and cannot be fooled by PID reuse once opened.

use std::os::fd::{AsFd, FromRawFd, OwnedFd};

use husk_common::error::{HuskError, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Delivers `signal` to `pid`.
///
/// Returns `false` if the process no longer exists.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] for any failure other than `ESRCH`.
pub fn signal(pid: i32, signal: Signal) -> Result<bool> {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => {
            tracing::info!(pid, %signal, "signal delivered");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            tracing::debug!(pid, %signal, "process already gone");
            Ok(false)
        }
        Err(e) => Err(HuskError::syscall(format!("kill {pid} with {signal}"), e)),
    }
}

/// Whether `pid` still exists (zombies included).
pub fn is_alive(pid: i32) -> bool {
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

/// Reaps `child` if it has exited. Only valid for children of this process.
///
/// Returns `true` while the child is still running.
pub fn child_running(child: Pid) -> bool {
    matches!(
        waitpid(child, Some(WaitPidFlag::WNOHANG)),
        Ok(WaitStatus::StillAlive)
    )
}

/// A pidfd referring to one process.
#[derive(Debug)]
pub struct PidFd {
    fd: OwnedFd,
    pid: i32,
}

impl PidFd {
    /// Opens a pidfd for `pid`. Returns `None` if the process is gone.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Syscall`] if `pidfd_open(2)` fails for another
    /// reason.
    pub fn open(pid: i32) -> Result<Option<Self>> {
        // SAFETY: pidfd_open takes a pid and a flags word and returns a new
        // descriptor or -1.
        let ret = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(None);
            }
            return Err(HuskError::syscall(format!("pidfd_open {pid}"), err));
        }
        let raw = i32::try_from(ret)
            .map_err(|_| HuskError::protocol(format!("pidfd_open {pid} returned {ret}")))?;
        // SAFETY: `raw` is a fresh descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Some(Self { fd, pid }))
    }

    /// Blocks until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Syscall`] if `poll(2)` fails.
    pub fn wait_exit(&self) -> Result<()> {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(n) if n > 0 => {
                    tracing::debug!(pid = self.pid, "process exited");
                    return Ok(());
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(HuskError::syscall(format!("poll pidfd of {}", self.pid), e));
                }
            }
        }
    }
}

/// Kills `pid` with `SIGKILL` if it still exists and blocks until it has
/// exited. Returns `false` if there was nothing to kill.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if the process cannot be signalled or
/// waited on.
pub fn kill_and_wait(pid: i32) -> Result<bool> {
    if !is_alive(pid) {
        return Ok(false);
    }
    let Some(pidfd) = PidFd::open(pid)? else {
        return Ok(false);
    };
    if !signal(pid, Signal::SIGKILL)? {
        return Ok(false);
    }
    pidfd.wait_exit()?;
    Ok(true)
}
