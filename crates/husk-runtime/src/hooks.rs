//! Lifecycle hook execution.
//!
//! Hooks receive the container state on stdin and run with exactly the
//! environment they declare. Output is captured in an anonymous in-memory
//! file shared by stdout and stderr, and timeouts are enforced by polling,
//! so no pipes or helper threads are needed. This keeps the executor usable
//! from the single-threaded launcher.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use husk_common::error::{HuskError, Result};
use husk_common::spec::{Hook, HookPoint};
use nix::sys::memfd::{MFdFlags, memfd_create};

use crate::state::ContainerState;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output kept in error messages, in bytes.
const MAX_REPORTED_OUTPUT: usize = 4096;

/// Runs every hook of `point` in order.
///
/// Failures at fatal points (`createRuntime`, `createContainer`,
/// `startContainer`) stop the sequence and are returned. Failures at the
/// other points are logged and the remaining hooks still run.
///
/// # Errors
///
/// Returns the first hook error of a fatal point, or
/// [`HuskError::Serialization`] if the state cannot be encoded.
pub fn run_hooks(point: HookPoint, hooks: &[Hook], state: &ContainerState) -> Result<()> {
    if hooks.is_empty() {
        return Ok(());
    }
    let state_json = state.to_json()?;
    tracing::debug!(id = %state.id, %point, count = hooks.len(), "running hooks");

    for hook in hooks {
        match run_hook(hook, &state_json) {
            Ok(()) => {}
            Err(e) if point.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(id = %state.id, %point, hook = %hook.path.display(), error = %e, "hook failed");
            }
        }
    }
    Ok(())
}

/// Runs one hook with `state_json` on its stdin.
///
/// # Errors
///
/// Returns [`HuskError::HookTimeout`] if the hook outlives its timeout,
/// [`HuskError::HookFailed`] if it exits unsuccessfully or cannot be
/// spawned, and [`HuskError::Syscall`] if the capture files cannot be set up.
pub fn run_hook(hook: &Hook, state_json: &str) -> Result<()> {
    let mut stdin = memfd(c"husk-hook-stdin")?;
    stdin
        .write_all(state_json.as_bytes())
        .and_then(|()| stdin.seek(SeekFrom::Start(0)).map(|_| ()))
        .map_err(|e| HuskError::syscall("write hook stdin", e))?;

    let mut output = memfd(c"husk-hook-output")?;
    let stderr = output
        .try_clone()
        .map_err(|e| HuskError::syscall("duplicate hook output", e))?;

    let mut command = Command::new(&hook.path);
    if let Some((arg0, rest)) = hook.args.split_first() {
        let _ = command.arg0(arg0).args(rest);
    }
    let _ = command
        .env_clear()
        .envs(hook.env.iter().filter_map(|kv| kv.split_once('=')))
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(output.try_clone().map_err(|e| {
            HuskError::syscall("duplicate hook output", e)
        })?))
        .stderr(Stdio::from(stderr));

    let mut child = command.spawn().map_err(|e| HuskError::HookFailed {
        path: hook.path.clone(),
        reason: format!("spawn: {e}"),
    })?;
    tracing::debug!(hook = %hook.path.display(), pid = child.id(), "hook spawned");

    let deadline = hook
        .timeout
        .map(|secs| (secs, Instant::now() + Duration::from_secs(secs)));
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => return Err(HuskError::syscall("wait for hook", e)),
        }
        if let Some((secs, deadline)) = deadline {
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(hook = %hook.path.display(), timeout_secs = secs, "hook killed after timeout");
                return Err(HuskError::HookTimeout {
                    path: hook.path.clone(),
                    timeout_secs: secs,
                });
            }
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    };

    if status.success() {
        return Ok(());
    }
    Err(HuskError::HookFailed {
        path: hook.path.clone(),
        reason: describe_failure(status, &read_back(&mut output)),
    })
}

fn describe_failure(status: ExitStatus, output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {output}")
    }
}

fn read_back(file: &mut File) -> String {
    let mut buf = Vec::new();
    if file.seek(SeekFrom::Start(0)).is_err() {
        return String::new();
    }
    let _ = file
        .take(MAX_REPORTED_OUTPUT as u64)
        .read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn memfd(name: &std::ffi::CStr) -> Result<File> {
    let fd = memfd_create(name, MFdFlags::MFD_CLOEXEC)
        .map_err(|e| HuskError::syscall("memfd_create", e))?;
    Ok(File::from(fd))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use husk_common::types::ContainerId;

    use super::*;

    fn shell_hook(script: &str, mut env: Vec<String>, timeout: Option<u64>) -> Hook {
        env.push("PATH=/usr/sbin:/usr/bin:/sbin:/bin".into());
        Hook {
            path: PathBuf::from("/bin/sh"),
            args: vec!["sh".into(), "-c".into(), script.into()],
            env,
            timeout,
        }
    }

    fn state() -> ContainerState {
        ContainerState::new(
            ContainerId::parse("hooked").expect("valid id"),
            PathBuf::from("/bundle"),
            PathBuf::from("/bundle/rootfs"),
        )
    }

    #[test]
    fn timeout_kills_hook_promptly() {
        let hook = shell_hook("sleep 5", Vec::new(), Some(1));
        let started = Instant::now();
        let err = run_hook(&hook, "{}").expect_err("must time out");
        assert!(matches!(err, HuskError::HookTimeout { timeout_secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn failure_reports_combined_output() {
        let hook = shell_hook("echo out; echo boom >&2; exit 3", Vec::new(), None);
        let err = run_hook(&hook, "{}").expect_err("must fail");
        assert!(matches!(err, HuskError::HookFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("boom"), "{message}");
        assert!(message.contains("out"), "{message}");
    }

    #[test]
    fn hook_reads_state_and_sees_only_declared_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("seen");
        let hook = shell_hook(
            "cat > \"$OUT\"; echo \"home=$HOME\" >> \"$OUT\"",
            vec![format!("OUT={}", out.display())],
            Some(10),
        );
        run_hooks(HookPoint::CreateRuntime, &[hook], &state()).expect("hook runs");

        let seen = std::fs::read_to_string(&out).expect("hook output");
        assert!(seen.contains("\"id\":\"hooked\""), "{seen}");
        assert!(seen.ends_with("home=\n"), "{seen}");
    }

    #[test]
    fn best_effort_points_swallow_failures() {
        let hooks = [shell_hook("exit 1", Vec::new(), None)];
        run_hooks(HookPoint::Poststart, &hooks, &state()).expect("poststart is best-effort");
        run_hooks(HookPoint::Poststop, &hooks, &state()).expect("poststop is best-effort");
        run_hooks(HookPoint::Prestart, &hooks, &state()).expect("prestart is best-effort");
    }

    #[test]
    fn fatal_points_stop_at_first_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("second-ran");
        let hooks = [
            shell_hook("exit 1", Vec::new(), None),
            shell_hook(&format!("touch {}", marker.display()), Vec::new(), None),
        ];
        let err = run_hooks(HookPoint::CreateContainer, &hooks, &state()).expect_err("fatal");
        assert!(err.is_hook_error());
        assert!(!marker.exists());
    }
}
