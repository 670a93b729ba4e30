//! Stage two: the launcher process.
//!
//! Runs as `husk init <id>` inside the namespaces created by stage one.
//! Everything here happens on the single thread of a freshly executed
//! process; [`run`] refuses to start otherwise.

use std::convert::Infallible;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use husk_common::config::HuskConfig;
use husk_common::error::{HuskError, Result};
use husk_common::spec::{HookPoint, NamespaceType, Process, Spec};
use husk_common::types::ContainerId;
use husk_core::capability::{self, ProcessCapabilities};
use husk_core::console::Pty;
use husk_core::filesystem::{pivot_root, rootfs};
use husk_core::namespace::{self, NamespacePlan, uts};
use husk_core::rlimit;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::{Gid, Uid, setgid, setgroups, setuid};

use crate::hooks::run_hooks;
use crate::ipc::{Handshake, Message, Receiver, Sender};
use crate::state::ContainerState;

const TASK_DIR: &str = "/proc/self/task";
const OOM_SCORE_ADJ: &str = "/proc/self/oom_score_adj";

/// Signals whose default action terminates the process and that a sender
/// can be expected to use against a parked launcher.
const TERMINATING_SIGNALS: [Signal; 7] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGALRM,
];

/// Launcher entry point.
///
/// Returns `Ok(())` only for a spec without a process, after `ready` was
/// sent. Otherwise the process image is replaced and this never returns
/// successfully.
///
/// # Errors
///
/// Returns the first failing step; the caller exits non-zero and no user
/// program runs.
pub fn run(config: &HuskConfig, id: &ContainerId) -> Result<()> {
    ensure_single_threaded()?;
    exit_on_termination_signals()?;

    let paths = config.paths(id);
    let state = ContainerState::load(&paths.state_file(), id)?;
    let spec = Spec::load(paths.dir())?;
    let plan = NamespacePlan::from_spec(&spec);

    namespace::join_all(&plan.joins)?;

    let terminal = spec.process.as_ref().is_some_and(|p| p.terminal);
    if let Some(socket) = state.console_socket.as_deref().filter(|_| terminal) {
        let pty = Pty::open()?;
        pty.send_master(socket)?;
        pty.attach_slave()?;
    }

    rootfs::prepare_rootfs(&state.rootfs, &spec)?;
    if let Some(score) = spec.process.as_ref().and_then(|p| p.oom_score_adj) {
        std::fs::write(OOM_SCORE_ADJ, score.to_string())
            .map_err(|e| HuskError::io(OOM_SCORE_ADJ, e))?;
    }

    let Some(process) = &spec.process else {
        Sender::connect(&paths.init_socket())?.send(Message::Ready)?;
        tracing::info!(%id, "rootfs ready, no process to run");
        return Ok(());
    };

    let mut handshake = Handshake::new();
    let mut receiver = Receiver::bind(&paths.container_socket())?;
    Sender::connect(&paths.init_socket())?.send(Message::Ready)?;
    handshake.observe(Message::Ready)?;
    tracing::info!(%id, "launcher ready, waiting for start");

    let message = receiver.receive(None)?;
    handshake.observe(message)?;

    match exec_process(&state, &spec, &plan, process)? {}
}

/// Fails unless the calling process has exactly one thread.
///
/// # Errors
///
/// Returns [`HuskError::Io`] if the task directory cannot be read, or
/// [`HuskError::Validation`] when more than one thread exists.
pub fn ensure_single_threaded() -> Result<()> {
    let threads = std::fs::read_dir(TASK_DIR)
        .map_err(|e| HuskError::io(TASK_DIR, e))?
        .count();
    if threads != 1 {
        return Err(HuskError::validation(format!(
            "launcher must be single-threaded, found {threads} threads"
        )));
    }
    Ok(())
}

/// Makes every signal in the terminating set end the launcher with exit
/// status `128 + signo`.
///
/// As PID 1 of a new PID namespace the launcher would otherwise ignore
/// every catchable signal sent from outside. `execve` resets caught
/// signals to their default, so the user program is unaffected.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if `sigaction(2)` fails.
pub fn exit_on_termination_signals() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(exit_with_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in TERMINATING_SIGNALS {
        // SAFETY: the handler only calls `_exit`, which is async-signal-safe.
        let _ = unsafe { sigaction(signal, &action) }
            .map_err(|e| HuskError::syscall(format!("install {signal} handler"), e))?;
    }
    Ok(())
}

extern "C" fn exit_with_signal(signo: libc::c_int) {
    // SAFETY: `_exit` never returns and touches no shared state.
    unsafe { libc::_exit(128 + signo) }
}

fn exec_process(
    state: &ContainerState,
    spec: &Spec,
    plan: &NamespacePlan,
    process: &Process,
) -> Result<Infallible> {
    pivot_root::pivot_root(&state.rootfs)?;
    if let Some(linux) = &spec.linux {
        pivot_root::mask_paths(&linux.masked_paths)?;
        pivot_root::readonly_paths(&linux.readonly_paths)?;
        pivot_root::set_root_propagation(linux.rootfs_propagation.as_deref())?;
    }
    if spec.root_readonly() {
        pivot_root::remount_root_readonly()?;
    }

    if spec.has_namespace(NamespaceType::Uts) {
        if let Some(hostname) = &spec.hostname {
            uts::set_hostname(hostname)?;
        }
        if let Some(domainname) = &spec.domainname {
            uts::set_domainname(domainname)?;
        }
    }

    rlimit::apply(&process.rlimits)?;

    let caps = process
        .capabilities
        .as_ref()
        .map(ProcessCapabilities::from_spec)
        .transpose()?;
    if let Some(caps) = &caps {
        capability::restrict_bounding_set(caps.bounding)?;
    }
    set_identity(process, plan)?;
    if let Some(caps) = &caps {
        capability::apply(caps)?;
    }

    run_hooks(
        HookPoint::StartContainer,
        spec.hooks_for(HookPoint::StartContainer),
        state,
    )?;

    std::env::set_current_dir(&process.cwd).map_err(|e| HuskError::io(&process.cwd, e))?;
    let program = resolve_program(process)?;
    exec(&program, process)
}

fn set_identity(process: &Process, plan: &NamespacePlan) -> Result<()> {
    let user = &process.user;
    let groups: Vec<Gid> = user.additional_gids.iter().copied().map(Gid::from_raw).collect();
    // setgroups is denied in a user namespace created without privilege.
    if !(groups.is_empty() && plan.creates_user_namespace()) {
        setgroups(&groups).map_err(|e| HuskError::syscall("setgroups", e))?;
    }
    setgid(Gid::from_raw(user.gid))
        .map_err(|e| HuskError::syscall(format!("setgid {}", user.gid), e))?;
    setuid(Uid::from_raw(user.uid))
        .map_err(|e| HuskError::syscall(format!("setuid {}", user.uid), e))?;
    tracing::debug!(uid = user.uid, gid = user.gid, groups = ?user.additional_gids, "identity set");
    Ok(())
}

/// Resolves `args[0]` against the process `PATH`, relative to the cwd.
fn resolve_program(process: &Process) -> Result<PathBuf> {
    let name = process
        .args
        .first()
        .ok_or_else(|| HuskError::validation("process.args must not be empty"))?;
    if name.contains('/') {
        return Ok(PathBuf::from(name));
    }
    which::which_in(name, process.path_env(), &process.cwd).map_err(|_| HuskError::NotFound {
        kind: "executable",
        id: name.clone(),
    })
}

fn exec(program: &Path, process: &Process) -> Result<Infallible> {
    use std::os::unix::ffi::OsStrExt;

    let to_cstring = |s: &[u8]| {
        CString::new(s).map_err(|_| HuskError::validation("process arguments contain a NUL byte"))
    };
    let path = to_cstring(program.as_os_str().as_bytes())?;
    let args = process
        .args
        .iter()
        .map(|a| to_cstring(a.as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    let env = process
        .env
        .iter()
        .map(|e| to_cstring(e.as_bytes()))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(program = %program.display(), "executing container process");
    nix::unistd::execve(&path, &args, &env)
        .map_err(|e| HuskError::syscall(format!("execve {}", program.display()), e))
}
