//! Lifecycle controller.
//!
//! Every operation loads `state.json`, checks that the current status
//! allows it, acts, and persists the new status. `state.json` therefore
//! always reflects the last completed step, never one in flight.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use husk_common::config::{ContainerPaths, HuskConfig};
use husk_common::error::{HuskError, Result};
use husk_common::spec::{HookPoint, Spec};
use husk_common::types::{ContainerId, Status};
use husk_core::cgroup::CgroupManager;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::bundle;
use crate::hooks::run_hooks;
use crate::ipc::{Handshake, Message, Receiver, Sender};
use crate::launcher;
use crate::process::{self, PidFd};
use crate::state::ContainerState;

/// Arguments of [`Engine::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// New container identifier.
    pub id: ContainerId,
    /// Bundle directory holding `config.json` and the rootfs.
    pub bundle: PathBuf,
    /// Unix socket that receives the pty master when `process.terminal` is set.
    pub console_socket: Option<PathBuf>,
    /// File that receives the launcher PID once the container is created.
    pub pid_file: Option<PathBuf>,
}

/// Drives container lifecycles under one runtime root.
#[derive(Debug, Clone)]
pub struct Engine {
    config: HuskConfig,
    launcher_args: Vec<String>,
}

impl Engine {
    /// Engine over the given configuration.
    #[must_use]
    pub const fn new(config: HuskConfig) -> Self {
        Self {
            config,
            launcher_args: Vec::new(),
        }
    }

    /// Global flags forwarded to the re-executed launcher, such as log
    /// settings.
    #[must_use]
    pub fn with_launcher_args(mut self, args: Vec<String>) -> Self {
        self.launcher_args = args;
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &HuskConfig {
        &self.config
    }

    /// Creates a container and leaves it parked in `created`.
    ///
    /// Any failure after the container entry exists tears it down: the
    /// launcher is killed, the cgroup and directory are removed and the
    /// `poststop` hooks run; the original error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::AlreadyExists`] for a duplicate ID, spec load and
    /// validation errors, fatal hook errors, launcher errors, and
    /// [`HuskError::Protocol`] if `ready` does not arrive in time.
    pub fn create(&self, opts: &CreateOptions) -> Result<ContainerState> {
        let paths = self.config.paths(&opts.id);
        if paths.dir().exists() {
            return Err(HuskError::AlreadyExists {
                id: opts.id.to_string(),
            });
        }

        let bundle =
            std::fs::canonicalize(&opts.bundle).map_err(|e| HuskError::io(&opts.bundle, e))?;
        let spec = Spec::load(&bundle)?;

        std::fs::create_dir_all(paths.dir()).map_err(|e| HuskError::io(paths.dir(), e))?;
        let mut state = ContainerState::new(opts.id.clone(), bundle, paths.rootfs());
        state.console_socket.clone_from(&opts.console_socket);
        state.annotations.clone_from(&spec.annotations);
        if let Err(e) = state.save(&paths.state_file()) {
            let _ = std::fs::remove_dir_all(paths.dir());
            return Err(e);
        }
        tracing::info!(id = %opts.id, bundle = %state.bundle.display(), "creating container");

        match self.build(&paths, &spec, &mut state, opts.pid_file.as_deref()) {
            Ok(()) => Ok(state),
            Err(e) => {
                tracing::warn!(id = %opts.id, error = %e, "create failed, tearing down");
                self.teardown(&paths, &spec, &state);
                Err(e)
            }
        }
    }

    fn build(
        &self,
        paths: &ContainerPaths,
        spec: &Spec,
        state: &mut ContainerState,
        pid_file: Option<&Path>,
    ) -> Result<()> {
        bundle::copy_config(&state.bundle, paths.dir())?;
        bundle::copy_rootfs(&state.bundle.join(spec.root_path()), &paths.rootfs())?;

        run_hooks(
            HookPoint::CreateRuntime,
            spec.hooks_for(HookPoint::CreateRuntime),
            state,
        )?;
        run_hooks(
            HookPoint::CreateContainer,
            spec.hooks_for(HookPoint::CreateContainer),
            state,
        )?;

        let mut receiver = Receiver::bind(&paths.init_socket())?;
        let pid = launcher::spawn(&state.id, spec, &self.config.root_dir, &self.launcher_args)?;
        state.pid = Some(pid.as_raw());
        state.save(&paths.state_file())?;

        if let Some(cgroup) = self.cgroup_for(spec, &state.id) {
            cgroup.create()?;
            if let Some(resources) = spec.linux.as_ref().and_then(|l| l.resources.as_ref()) {
                cgroup.apply(resources)?;
            }
            cgroup.add_process(pid.as_raw())?;
        }

        let (received, reaped) = await_ready(&mut receiver, pid, self.config.ready_timeout());
        if reaped {
            state.pid = None;
        }
        Handshake::new().observe(received?)?;

        state.transition(Status::Created, "create")?;
        state.save(&paths.state_file())?;

        if let Some(pid_file) = pid_file {
            std::fs::write(pid_file, pid.as_raw().to_string())
                .map_err(|e| HuskError::io(pid_file, e))?;
        }
        tracing::info!(id = %state.id, %pid, "container created");
        Ok(())
    }

    fn teardown(&self, paths: &ContainerPaths, spec: &Spec, state: &ContainerState) {
        if let Some(pid) = state.pid {
            let _ = process::signal(pid, Signal::SIGKILL);
            let _ = nix::sys::wait::waitpid(Pid::from_raw(pid), None);
        }
        self.remove_entry(paths, Some(spec), &state.id);

        let mut stopped = state.clone();
        stopped.status = Status::Stopped;
        let _ = run_hooks(
            HookPoint::Poststop,
            spec.hooks_for(HookPoint::Poststop),
            &stopped,
        );
    }

    /// Releases a created container and blocks until its process exits.
    ///
    /// A container without a process moves straight to `stopped` and its
    /// `container.sock` is never dialed.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::InvalidState`] unless the container is
    /// `created`, leaving `state.json` untouched, and handshake or wait
    /// errors otherwise.
    pub fn start(&self, id: &ContainerId) -> Result<ContainerState> {
        let paths = self.config.paths(id);
        let mut state = ContainerState::load(&paths.state_file(), id)?;
        if state.status != Status::Created {
            return Err(state.invalid("start"));
        }
        let spec = Spec::load(paths.dir())?;

        if spec.process.is_none() {
            state.transition(Status::Stopped, "start")?;
            state.pid = None;
            state.save(&paths.state_file())?;
            tracing::info!(%id, "no process declared, container stopped");
            return Ok(state);
        }

        let pid = state.pid.ok_or_else(|| state.invalid("start"))?;
        let Some(pidfd) = PidFd::open(pid)? else {
            state.transition(Status::Stopped, "start")?;
            state.pid = None;
            state.save(&paths.state_file())?;
            return Err(HuskError::protocol(format!(
                "launcher {pid} of {id} exited before start"
            )));
        };

        let sender = Sender::connect(&paths.container_socket())?;
        run_hooks(HookPoint::Prestart, spec.hooks_for(HookPoint::Prestart), &state)?;
        sender.send(Message::Start)?;
        state.transition(Status::Running, "start")?;
        state.save(&paths.state_file())?;
        tracing::info!(%id, pid, "container started");

        pidfd.wait_exit()?;
        run_hooks(HookPoint::Poststart, spec.hooks_for(HookPoint::Poststart), &state)?;

        // A concurrent kill may already have recorded the stop.
        let mut state = ContainerState::load(&paths.state_file(), id)?;
        if state.status != Status::Stopped {
            state.transition(Status::Stopped, "start")?;
        }
        state.pid = None;
        state.save(&paths.state_file())?;
        tracing::info!(%id, pid, "container process exited");
        Ok(state)
    }

    /// Sends `signal` to the container process and records it as stopped.
    ///
    /// The signal is only delivered; a process that survives it is killed
    /// by the following `delete`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::InvalidState`] unless the container is
    /// `created` or `running`, or [`HuskError::Syscall`] if delivery fails.
    pub fn kill(&self, id: &ContainerId, signal: Signal) -> Result<ContainerState> {
        let paths = self.config.paths(id);
        let mut state = ContainerState::load(&paths.state_file(), id)?;
        if !state.status.has_process() {
            return Err(state.invalid("kill"));
        }

        if let Some(pid) = state.pid {
            if !process::signal(pid, signal)? {
                tracing::warn!(%id, pid, "container process already exited");
            }
        }
        state.transition(Status::Stopped, "kill")?;
        state.save(&paths.state_file())?;

        match Spec::load(paths.dir()) {
            Ok(spec) => {
                run_hooks(HookPoint::Poststop, spec.hooks_for(HookPoint::Poststop), &state)?;
            }
            Err(e) => tracing::warn!(%id, error = %e, "poststop hooks skipped"),
        }
        Ok(state)
    }

    /// Removes a container entry.
    ///
    /// With `force`, a container that may still have a live process is
    /// accepted. Any process still recorded for the container is killed
    /// and waited for before its cgroup is removed. Resources that are
    /// already gone are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::NotFound`] if no entry exists and
    /// [`HuskError::InvalidState`] for a non-stopped container without
    /// `force`.
    pub fn delete(&self, id: &ContainerId, force: bool) -> Result<()> {
        let paths = self.config.paths(id);
        let state = match ContainerState::load(&paths.state_file(), id) {
            Ok(state) => Some(state),
            Err(HuskError::NotFound { .. }) if paths.dir().exists() => None,
            Err(e) => return Err(e),
        };

        if let Some(state) = &state {
            if state.status != Status::Stopped && !force {
                return Err(state.invalid("delete"));
            }
            if let Some(pid) = state.pid {
                if process::kill_and_wait(pid)? {
                    tracing::warn!(
                        %id,
                        pid,
                        status = %state.status,
                        "killed leftover container process"
                    );
                }
            }
        }

        let spec = Spec::load(paths.dir()).ok();
        self.remove_entry(&paths, spec.as_ref(), id);
        tracing::info!(%id, force, "container deleted");
        Ok(())
    }

    /// Returns the persisted state document unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::NotFound`] if no entry exists.
    pub fn state(&self, id: &ContainerId) -> Result<ContainerState> {
        ContainerState::load(&self.config.paths(id).state_file(), id)
    }

    fn cgroup_for(&self, spec: &Spec, id: &ContainerId) -> Option<CgroupManager> {
        let linux = spec.linux.as_ref()?;
        if linux.cgroups_path.is_none() && linux.resources.is_none() {
            return None;
        }
        Some(CgroupManager::for_container(
            &self.config.cgroup_root,
            linux.cgroups_path.as_deref(),
            id,
        ))
    }

    fn remove_entry(&self, paths: &ContainerPaths, spec: Option<&Spec>, id: &ContainerId) {
        if let Some(cgroup) = spec.and_then(|s| self.cgroup_for(s, id)) {
            if let Err(e) = cgroup.destroy() {
                tracing::warn!(%id, error = %e, "cgroup not removed");
            }
        }
        for socket in [paths.init_socket(), paths.container_socket()] {
            remove_ignoring_missing(&socket, |p| std::fs::remove_file(p));
        }
        remove_ignoring_missing(paths.dir(), |p| std::fs::remove_dir_all(p));
    }
}

/// Waits for the launcher `pid` to report `ready`. The flag is set when the
/// liveness check already reaped the launcher, which must then not be
/// signalled or waited for again.
fn await_ready(
    receiver: &mut Receiver,
    pid: Pid,
    timeout: Duration,
) -> (Result<Message>, bool) {
    let mut reaped = false;
    let received = receiver.receive_while(Some(timeout), || {
        let running = process::child_running(pid);
        reaped = !running;
        running
    });
    (received, reaped)
}

fn remove_ignoring_missing(path: &Path, remove: fn(&Path) -> std::io::Result<()>) {
    match remove(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "not removed"),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use nix::errno::Errno;
    use nix::sys::wait::waitpid;

    use super::*;

    #[test]
    fn launcher_exiting_before_ready_is_reported_as_reaped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut receiver = Receiver::bind(&dir.path().join("init.sock")).expect("bind");
        let child = Command::new("/bin/sh")
            .args(["-c", "exit 3"])
            .spawn()
            .expect("spawn");
        let pid = Pid::from_raw(i32::try_from(child.id()).expect("pid fits"));

        let (received, reaped) = await_ready(&mut receiver, pid, Duration::from_secs(10));
        assert!(matches!(received, Err(HuskError::Protocol { .. })));
        assert!(reaped);
        assert_eq!(waitpid(pid, None), Err(Errno::ECHILD));
    }

    #[test]
    fn ready_from_live_launcher_is_not_reaped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("init.sock");
        let mut receiver = Receiver::bind(&path).expect("bind");
        let mut child = Command::new("/bin/sleep").arg("30").spawn().expect("spawn");
        let pid = Pid::from_raw(i32::try_from(child.id()).expect("pid fits"));
        Sender::connect(&path)
            .expect("connect")
            .send(Message::Ready)
            .expect("send");

        let (received, reaped) = await_ready(&mut receiver, pid, Duration::from_secs(10));
        assert_eq!(received.expect("ready"), Message::Ready);
        assert!(!reaped);
        child.kill().expect("kill");
        let _ = child.wait().expect("reap");
    }
}
