//! Pseudo-terminal handoff for containers with `process.terminal` set.
//!
//! The launcher opens a pty pair, sends the master to whoever listens on
//! the console socket (`SCM_RIGHTS`), and makes the slave its controlling
//! terminal and stdio before the user program is executed.

use std::io::IoSlice;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

use husk_common::error::{HuskError, Result};
use nix::pty::openpty;
use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};

nix::ioctl_write_int_bad!(
    /// `TIOCSCTTY`: makes the terminal the controlling terminal of the
    /// calling session.
    ///
    /// # Safety
    ///
    /// `fd` must be an open terminal descriptor.
    set_controlling_terminal,
    libc::TIOCSCTTY
);

/// An open pty pair.
#[derive(Debug)]
pub struct Pty {
    master: OwnedFd,
    slave: OwnedFd,
}

impl Pty {
    /// Opens a new pty pair.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Syscall`] if `openpty(3)` fails.
    pub fn open() -> Result<Self> {
        let pair = openpty(None, None).map_err(|e| HuskError::syscall("openpty", e))?;
        Ok(Self {
            master: pair.master,
            slave: pair.slave,
        })
    }

    /// Sends the master side over the unix socket at `console_socket` and
    /// closes the local copy.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if the socket cannot be reached or
    /// [`HuskError::Syscall`] if `sendmsg(2)` fails.
    pub fn send_master(&self, console_socket: &Path) -> Result<()> {
        let stream =
            UnixStream::connect(console_socket).map_err(|e| HuskError::io(console_socket, e))?;
        let fds = [self.master.as_raw_fd()];
        let payload = b"/dev/ptmx";
        let iov = [IoSlice::new(payload)];
        let cmsg = [ControlMessage::ScmRights(&fds)];
        let _ = sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
            .map_err(|e| {
                HuskError::syscall(format!("send pty master to {}", console_socket.display()), e)
            })?;
        tracing::debug!(socket = %console_socket.display(), "pty master sent");
        Ok(())
    }

    /// Starts a new session with the slave as controlling terminal and as
    /// stdin, stdout and stderr. Consumes the pair; the master is closed.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Syscall`] if `setsid(2)`, `TIOCSCTTY` or
    /// `dup2(2)` fails.
    pub fn attach_slave(self) -> Result<()> {
        drop(self.master);
        let _ = nix::unistd::setsid().map_err(|e| HuskError::syscall("setsid", e))?;

        let slave = self.slave.as_raw_fd();
        // SAFETY: `slave` is an open terminal descriptor owned by `self.slave`.
        let _ = unsafe { set_controlling_terminal(slave, 0) }
            .map_err(|e| HuskError::syscall("set controlling terminal", e))?;
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            // SAFETY: both descriptors are valid; dup2 atomically replaces
            // the standard descriptor.
            if unsafe { libc::dup2(slave, target) } < 0 {
                return Err(HuskError::syscall(
                    format!("dup2 pty onto fd {target}"),
                    std::io::Error::last_os_error(),
                ));
            }
        }
        tracing::debug!("pty attached as controlling terminal");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    use nix::sys::socket::{ControlMessageOwned, recvmsg};

    #[test]
    fn master_is_delivered_over_console_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("console.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        let pty = Pty::open().expect("openpty");
        pty.send_master(&path).expect("send");

        let (conn, _) = listener.accept().expect("accept");
        let mut buf = [0u8; 64];
        let mut iov = [std::io::IoSliceMut::new(&mut buf)];
        let mut space = nix::cmsg_space!([std::os::fd::RawFd; 1]);
        let msg = recvmsg::<()>(conn.as_raw_fd(), &mut iov, Some(&mut space), MsgFlags::empty())
            .expect("recvmsg");
        let received = msg
            .cmsgs()
            .expect("control messages")
            .any(|c| matches!(c, ControlMessageOwned::ScmRights(fds) if fds.len() == 1));
        assert!(received);
    }
}
