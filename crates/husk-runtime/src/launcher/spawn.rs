//! Stage one: cloning the launcher.

use std::ffi::{CString, c_char};
use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use husk_common::constants::{APP_NAME, INIT_SUBCOMMAND};
use husk_common::error::{HuskError, Result};
use husk_common::spec::{NamespaceType, Spec};
use husk_common::types::ContainerId;
use husk_core::namespace::user::IdMaps;
use husk_core::namespace::{self, NamespacePlan};
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::signal::Signal;
use nix::unistd::{Pid, pipe2};

const STACK_SIZE: usize = 1024 * 1024;

/// Byte written to the sync pipe once the child may continue.
const RELEASE: u8 = 1;

const SELF_EXE: &str = "/proc/self/exe";

/// Clones the launcher for container `id` and returns its PID.
///
/// The child is held on a pipe until the controller has written its
/// UID/GID maps, then re-executes this binary as
/// `husk [global_args] --root <root> init <id>`.
///
/// # Errors
///
/// Returns [`HuskError::Syscall`] if the PID or time namespace cannot be
/// entered or `clone(2)` fails, and [`HuskError::Io`] if the ID maps or the
/// release byte cannot be written. The child is killed in the latter case.
pub fn spawn(id: &ContainerId, spec: &Spec, root: &Path, global_args: &[String]) -> Result<Pid> {
    let plan = NamespacePlan::from_spec(spec);

    let exe = cstring(SELF_EXE.as_bytes())?;
    let argv = launcher_argv(id, root, global_args)?;
    let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    if let Some(path) = &plan.pid_join {
        namespace::join(NamespaceType::Pid, path)?;
    }
    if plan.new_time {
        let offsets = spec.linux.as_ref().and_then(|l| l.time_offsets.as_ref());
        namespace::unshare_time(offsets)?;
    }

    let (read_end, write_end) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| HuskError::syscall("create sync pipe", e))?;
    let read_fd = read_end.as_raw_fd();
    let write_fd = write_end.as_raw_fd();
    let mount_join = plan.mount_join.as_deref();

    let child = move || -> isize {
        // SAFETY: the child owns a private copy of the descriptor table;
        // closing its copy of the write end lets a dead parent surface as EOF.
        let _ = unsafe { libc::close(write_fd) };
        let mut byte = 0_u8;
        // SAFETY: reads one byte into a live stack variable.
        let n = unsafe { libc::read(read_fd, (&raw mut byte).cast(), 1) };
        if n != 1 || byte != RELEASE {
            return 1;
        }
        if let Some(path) = mount_join {
            if namespace::join(NamespaceType::Mount, path).is_err() {
                return 1;
            }
        }
        // SAFETY: `exe` and every `argv` entry are NUL-terminated and
        // outlive this call; `argv_ptrs` is NULL-terminated.
        let _ = unsafe { libc::execv(exe.as_ptr(), argv_ptrs.as_ptr()) };
        127
    };

    let mut stack = vec![0_u8; STACK_SIZE];
    // SAFETY: the child runs on `stack`, which outlives the call, and only
    // performs async-signal-safe work before execv apart from the optional
    // mount namespace join.
    let pid = unsafe {
        clone(
            Box::new(child),
            &mut stack,
            plan.clone_flags,
            Some(Signal::SIGCHLD as libc::c_int),
        )
    }
    .map_err(|e| HuskError::syscall(format!("clone launcher for {id}"), e))?;
    drop(read_end);
    tracing::info!(%id, %pid, flags = ?plan.clone_flags, "launcher cloned");

    if let Err(e) = release(&plan, spec, pid, write_end) {
        let _ = nix::sys::signal::kill(pid, Signal::SIGKILL);
        let _ = nix::sys::wait::waitpid(pid, None);
        return Err(e);
    }
    Ok(pid)
}

fn release(
    plan: &NamespacePlan,
    spec: &Spec,
    pid: Pid,
    write_end: std::os::fd::OwnedFd,
) -> Result<()> {
    if plan.creates_user_namespace() {
        let (uids, gids) = spec
            .linux
            .as_ref()
            .map_or((&[][..], &[][..]), |l| {
                (l.uid_mappings.as_slice(), l.gid_mappings.as_slice())
            });
        IdMaps::resolve(uids, gids).write(pid)?;
    }
    let mut pipe = File::from(write_end);
    pipe.write_all(&[RELEASE])
        .map_err(|e| HuskError::syscall(format!("release launcher {pid}"), e))
}

fn launcher_argv(id: &ContainerId, root: &Path, global_args: &[String]) -> Result<Vec<CString>> {
    let mut argv = Vec::with_capacity(global_args.len() + 5);
    argv.push(cstring(APP_NAME.as_bytes())?);
    for arg in global_args {
        argv.push(cstring(arg.as_bytes())?);
    }
    argv.push(cstring(b"--root")?);
    argv.push(cstring(root.as_os_str().as_bytes())?);
    argv.push(cstring(INIT_SUBCOMMAND.as_bytes())?);
    argv.push(cstring(id.as_str().as_bytes())?);
    Ok(argv)
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        HuskError::validation(format!(
            "argument contains a NUL byte: {}",
            String::from_utf8_lossy(bytes)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_reenters_through_hidden_init() {
        let id = ContainerId::parse("web").expect("valid id");
        let argv = launcher_argv(
            &id,
            Path::new("/run/husk"),
            &["--log-format".into(), "json".into()],
        )
        .expect("argv");
        let argv: Vec<&str> = argv.iter().map(|a| a.to_str().expect("utf-8")).collect();
        assert_eq!(
            argv,
            ["husk", "--log-format", "json", "--root", "/run/husk", "init", "web"]
        );
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert!(cstring(b"bad\0arg").is_err());
    }
}
