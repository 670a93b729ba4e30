//! The ready/start handshake between controller and launcher.
//!
//! Each direction is a filesystem unix socket carrying exactly one message
//! per container lifetime. The receiving side always binds before its
//! counterpart can write, so no message is ever lost and nothing retries.

use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use husk_common::constants::{READY_MESSAGE, START_MESSAGE};
use husk_common::error::{HuskError, Result};

/// Upper bound on a handshake payload; anything longer is a protocol error.
pub const MAX_MESSAGE_LEN: usize = 64;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The two handshake messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Launcher to controller: the rootfs is built.
    Ready,
    /// Controller to launcher: release the user program.
    Start,
}

impl Message {
    /// Wire form of the message.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => READY_MESSAGE,
            Self::Start => START_MESSAGE,
        }
    }

    /// Parses an exact wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Protocol`] for anything but `ready` or `start`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload {
            p if p == READY_MESSAGE.as_bytes() => Ok(Self::Ready),
            p if p == START_MESSAGE.as_bytes() => Ok(Self::Start),
            other => Err(HuskError::protocol(format!(
                "unexpected payload {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing observed yet.
    WaitingForReady,
    /// `ready` observed, `start` pending.
    WaitingForStart,
    /// Both messages observed; the user program may run.
    Released,
}

/// Ordering guard for one side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    phase: Phase,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// A handshake that has not seen any message.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::WaitingForReady,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Records `message`, which must be the next one in order.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Protocol`] for an out-of-order message.
    pub fn observe(&mut self, message: Message) -> Result<()> {
        self.phase = match (self.phase, message) {
            (Phase::WaitingForReady, Message::Ready) => Phase::WaitingForStart,
            (Phase::WaitingForStart, Message::Start) => Phase::Released,
            (phase, message) => {
                return Err(HuskError::protocol(format!(
                    "{message} received while in phase {phase:?}"
                )));
            }
        };
        Ok(())
    }
}

/// Listening end of one handshake socket.
#[derive(Debug)]
pub struct Receiver {
    listener: UnixListener,
    path: PathBuf,
    queue: VecDeque<u8>,
}

impl Receiver {
    /// Removes any stale socket at `path` and listens on it.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if the stale path cannot be removed or the
    /// socket cannot be bound.
    pub fn bind(path: &Path) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(HuskError::io(path, e)),
        }
        let listener = UnixListener::bind(path).map_err(|e| HuskError::io(path, e))?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            queue: VecDeque::with_capacity(MAX_MESSAGE_LEN),
        })
    }

    /// Accepts one connection and returns its message.
    ///
    /// `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Protocol`] on timeout or a bad payload, and
    /// [`HuskError::Io`] if accepting or reading fails.
    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<Message> {
        self.receive_while(timeout, || true)
    }

    /// Like [`Receiver::receive`], but gives up as soon as `alive` returns
    /// `false` between accept attempts.
    ///
    /// # Errors
    ///
    /// Same as [`Receiver::receive`]; a failed liveness check is reported as
    /// [`HuskError::Protocol`].
    pub fn receive_while(
        &mut self,
        timeout: Option<Duration>,
        mut alive: impl FnMut() -> bool,
    ) -> Result<Message> {
        let stream = match timeout {
            None => {
                self.set_nonblocking(false)?;
                let (stream, _) = self
                    .listener
                    .accept()
                    .map_err(|e| HuskError::io(&self.path, e))?;
                stream
            }
            Some(timeout) => self.accept_until(Instant::now() + timeout, &mut alive)?,
        };
        self.drain(stream)?;
        let payload: Vec<u8> = self.queue.drain(..).collect();
        let message = Message::parse(&payload)?;
        tracing::debug!(path = %self.path.display(), %message, "handshake message received");
        Ok(message)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(|e| HuskError::io(&self.path, e))
    }

    fn accept_until(
        &self,
        deadline: Instant,
        alive: &mut impl FnMut() -> bool,
    ) -> Result<UnixStream> {
        self.set_nonblocking(true)?;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| HuskError::io(&self.path, e))?;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    stream
                        .set_read_timeout(Some(remaining.max(ACCEPT_POLL_INTERVAL)))
                        .map_err(|e| HuskError::io(&self.path, e))?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !alive() {
                        return Err(HuskError::protocol(format!(
                            "peer of {} exited before sending",
                            self.path.display()
                        )));
                    }
                    if Instant::now() >= deadline {
                        return Err(HuskError::protocol(format!(
                            "timed out waiting on {}",
                            self.path.display()
                        )));
                    }
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(HuskError::io(&self.path, e)),
            }
        }
    }

    fn drain(&mut self, stream: UnixStream) -> Result<()> {
        let mut buf = Vec::with_capacity(MAX_MESSAGE_LEN + 1);
        let _ = stream
            .take(MAX_MESSAGE_LEN as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| HuskError::io(&self.path, e))?;
        if buf.len() > MAX_MESSAGE_LEN {
            return Err(HuskError::protocol(format!(
                "payload on {} exceeds {MAX_MESSAGE_LEN} bytes",
                self.path.display()
            )));
        }
        self.queue.extend(buf);
        Ok(())
    }
}

/// Dialing end of one handshake socket.
///
/// Connecting and writing are separate steps so the caller can do work
/// between reaching the peer and releasing it.
#[derive(Debug)]
pub struct Sender {
    stream: UnixStream,
    path: PathBuf,
}

impl Sender {
    /// Connects to the listener at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if nothing listens on `path`.
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|e| HuskError::io(path, e))?;
        tracing::trace!(path = %path.display(), "handshake socket connected");
        Ok(Self {
            stream,
            path: path.to_path_buf(),
        })
    }

    /// Writes `message` and closes the write half.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if the socket cannot be written.
    pub fn send(mut self, message: Message) -> Result<()> {
        self.stream
            .write_all(message.as_str().as_bytes())
            .map_err(|e| HuskError::io(&self.path, e))?;
        self.stream
            .shutdown(Shutdown::Write)
            .map_err(|e| HuskError::io(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), %message, "handshake message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_parse_is_exact() {
        assert_eq!(Message::parse(b"ready").expect("ready"), Message::Ready);
        assert_eq!(Message::parse(b"start").expect("start"), Message::Start);
        let bad: [&[u8]; 4] = [b"ready\n", b"READY", b"", b"go"];
        for bad in bad {
            assert!(matches!(
                Message::parse(bad),
                Err(HuskError::Protocol { .. })
            ));
        }
    }

    #[test]
    fn handshake_enforces_order() {
        let mut hs = Handshake::new();
        assert!(hs.observe(Message::Start).is_err());
        hs.observe(Message::Ready).expect("ready first");
        assert_eq!(hs.phase(), Phase::WaitingForStart);
        assert!(hs.observe(Message::Ready).is_err());
        hs.observe(Message::Start).expect("then start");
        assert_eq!(hs.phase(), Phase::Released);
        assert!(hs.observe(Message::Start).is_err());
    }

    #[test]
    fn receiver_bound_first_never_misses_a_delayed_sender() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("init.sock");
        let mut receiver = Receiver::bind(&path).expect("bind");

        let sender_path = path.clone();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            Sender::connect(&sender_path)?.send(Message::Ready)
        });

        let message = receiver
            .receive(Some(Duration::from_secs(5)))
            .expect("receive");
        assert_eq!(message, Message::Ready);
        sender.join().expect("join").expect("send");
    }

    #[test]
    fn message_sent_before_receive_is_queued_by_the_listener() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.sock");
        let mut receiver = Receiver::bind(&path).expect("bind");

        Sender::connect(&path)
            .expect("connect")
            .send(Message::Start)
            .expect("send");
        assert_eq!(receiver.receive(None).expect("receive"), Message::Start);
    }

    #[test]
    fn connected_sender_is_received_once_it_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("container.sock");
        let mut receiver = Receiver::bind(&path).expect("bind");

        let sender = Sender::connect(&path).expect("connect");
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            sender.send(Message::Start)
        });

        let message = receiver
            .receive(Some(Duration::from_secs(5)))
            .expect("receive");
        assert_eq!(message, Message::Start);
        writer.join().expect("join").expect("send");
    }

    #[test]
    fn connect_without_listener_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Sender::connect(&dir.path().join("container.sock")).expect_err("no listener");
        assert!(matches!(err, HuskError::Io { .. }));
    }

    #[test]
    fn bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("init.sock");
        drop(Receiver::bind(&path).expect("first bind"));
        assert!(path.exists());
        let _receiver = Receiver::bind(&path).expect("rebind over stale path");
    }

    #[test]
    fn receive_times_out_without_sender() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut receiver = Receiver::bind(&dir.path().join("init.sock")).expect("bind");
        let started = Instant::now();
        let err = receiver
            .receive(Some(Duration::from_millis(100)))
            .expect_err("nobody sends");
        assert!(matches!(err, HuskError::Protocol { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn receive_stops_when_peer_is_gone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut receiver = Receiver::bind(&dir.path().join("init.sock")).expect("bind");
        let err = receiver
            .receive_while(Some(Duration::from_secs(10)), || false)
            .expect_err("peer gone");
        assert!(err.to_string().contains("exited"));
    }

    #[test]
    fn unexpected_payload_is_protocol_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("init.sock");
        let mut receiver = Receiver::bind(&path).expect("bind");

        let mut stream = UnixStream::connect(&path).expect("connect");
        stream.write_all(b"hello").expect("write");
        stream.shutdown(Shutdown::Write).expect("shutdown");

        assert!(matches!(
            receiver.receive(Some(Duration::from_secs(5))),
            Err(HuskError::Protocol { .. })
        ));
    }
}
