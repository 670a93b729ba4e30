//! Lifecycle integration tests for the husk engine.
//!
//! Containers are fabricated directly on disk under a temporary runtime
//! root, so these tests need neither root nor namespaces:
//! 1. State queries and start/kill/delete status rules
//! 2. Signal delivery to a real (unprivileged) child process
//! 3. The start handshake against a listener standing in for the launcher
//! 4. Create-time validation and hook-driven teardown

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::net::UnixListener;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use husk_common::config::HuskConfig;
use husk_common::error::HuskError;
use husk_common::types::{ContainerId, Status};
use husk_runtime::engine::{CreateOptions, Engine};
use husk_runtime::ipc::{Message, Receiver};
use husk_runtime::state::ContainerState;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

const NO_PROCESS_SPEC: &str = r#"{ "ociVersion": "1.2.0", "root": { "path": "rootfs" } }"#;

const PROCESS_SPEC: &str = r#"{
    "ociVersion": "1.2.0",
    "root": { "path": "rootfs" },
    "process": { "cwd": "/", "args": ["/bin/sh"] }
}"#;

fn id(name: &str) -> ContainerId {
    ContainerId::parse(name).expect("valid id")
}

fn engine(root: &Path) -> Engine {
    Engine::new(HuskConfig::with_root(root))
}

/// Writes a container entry with the given status, pid and spec.
fn fabricate(
    engine: &Engine,
    name: &str,
    status: Status,
    pid: Option<i32>,
    spec: &str,
) -> ContainerState {
    let paths = engine.config().paths(&id(name));
    std::fs::create_dir_all(paths.rootfs()).expect("mkdir");
    std::fs::write(paths.config_file(), spec).expect("write config");

    let mut state = ContainerState::new(id(name), PathBuf::from("/bundle"), paths.rootfs());
    state.status = status;
    state.pid = pid;
    state.save(&paths.state_file()).expect("save state");
    state
}

fn sleeper() -> (Child, i32) {
    let child = Command::new("/bin/sleep").arg("30").spawn().expect("spawn sleep");
    let pid = i32::try_from(child.id()).expect("pid fits");
    (child, pid)
}

// ── State ─────────────────────────────────────────────────────────────

#[test]
fn state_returns_persisted_document_unchanged() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let written = fabricate(&engine, "web", Status::Created, Some(1), NO_PROCESS_SPEC);

    let read = engine.state(&id("web")).expect("state");
    assert_eq!(read, written);
}

#[test]
fn state_of_unknown_container_is_not_found() {
    let root = tempfile::tempdir().expect("root");
    let err = engine(root.path()).state(&id("ghost")).expect_err("missing");
    assert!(matches!(err, HuskError::NotFound { .. }));
}

// ── Start ─────────────────────────────────────────────────────────────

#[test]
fn start_without_process_stops_without_dialing() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let _ = fabricate(&engine, "idle", Status::Created, None, NO_PROCESS_SPEC);

    let socket = engine.config().paths(&id("idle")).container_socket();
    let listener = UnixListener::bind(&socket).expect("bind");
    listener.set_nonblocking(true).expect("nonblocking");

    let state = engine.start(&id("idle")).expect("start");
    assert_eq!(state.status, Status::Stopped);
    assert_eq!(
        engine.state(&id("idle")).expect("state").status,
        Status::Stopped
    );
    let err = listener.accept().expect_err("nobody dialed");
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}

#[test]
fn start_on_non_created_leaves_state_untouched() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    for (name, status) in [
        ("running", Status::Running),
        ("stopped", Status::Stopped),
        ("creating", Status::Creating),
    ] {
        let _ = fabricate(&engine, name, status, Some(1), PROCESS_SPEC);
        let state_file = engine.config().paths(&id(name)).state_file();
        let before = std::fs::read(&state_file).expect("read");

        let err = engine.start(&id(name)).expect_err("not created");
        assert!(
            matches!(err, HuskError::InvalidState { operation: "start", .. }),
            "{name}: {err}"
        );
        assert_eq!(std::fs::read(&state_file).expect("read"), before);
    }
}

/// A process spec with one `prestart` script and a `poststart` hook that
/// copies the state it receives into `marker`.
fn hooked_process_spec(prestart: &str, marker: &Path) -> String {
    format!(
        r#"{{
            "ociVersion": "1.2.0",
            "root": {{ "path": "rootfs" }},
            "process": {{ "cwd": "/", "args": ["/bin/sh"] }},
            "hooks": {{
                "prestart": [
                    {{ "path": "/bin/sh", "args": ["sh", "-c", "{prestart}"] }}
                ],
                "poststart": [
                    {{
                        "path": "/bin/sh",
                        "args": ["sh", "-c", "cat > {marker}"],
                        "env": ["PATH=/usr/bin:/bin"]
                    }}
                ]
            }}
        }}"#,
        marker = marker.display()
    )
}

#[test]
fn start_releases_launcher_and_records_exit() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let marker = root.path().join("poststart-ran");
    let (mut child, pid) = sleeper();
    let _ = fabricate(
        &engine,
        "app",
        Status::Created,
        Some(pid),
        &hooked_process_spec("exit 1", &marker),
    );
    let paths = engine.config().paths(&id("app"));

    // Stands in for the parked launcher: takes `start`, waits until the
    // controller has persisted `running`, then lets the process die.
    let mut receiver = Receiver::bind(&paths.container_socket()).expect("bind");
    let state_file = paths.state_file();
    let launcher = std::thread::spawn(move || {
        let message = receiver
            .receive(Some(Duration::from_secs(10)))
            .expect("start arrives");
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            let status = ContainerState::load(&state_file, &id("app"))
                .expect("state")
                .status;
            if seen.last() != Some(&status) {
                seen.push(status);
            }
            if status == Status::Running {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        kill(Pid::from_raw(pid), Signal::SIGKILL).expect("end process");
        (message, seen)
    });

    let state = engine.start(&id("app")).expect("start despite failing prestart");
    let (message, seen) = launcher.join().expect("join");

    assert_eq!(message, Message::Start);
    assert_eq!(seen.last(), Some(&Status::Running));
    assert_eq!(state.status, Status::Stopped);
    assert_eq!(state.pid, None);
    assert_eq!(
        engine.state(&id("app")).expect("state").status,
        Status::Stopped
    );

    let poststart = std::fs::read_to_string(&marker).expect("poststart output");
    assert!(poststart.contains("\"status\":\"running\""), "{poststart}");
    assert_eq!(child.wait().expect("reap").signal(), Some(Signal::SIGKILL as i32));
}

#[test]
fn start_with_unreachable_launcher_runs_no_prestart_hook() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let prestart_marker = root.path().join("prestart-ran");
    let (mut child, pid) = sleeper();
    let spec = hooked_process_spec(
        &format!(": > {}", prestart_marker.display()),
        &root.path().join("unused"),
    );
    let _ = fabricate(&engine, "deaf", Status::Created, Some(pid), &spec);

    let err = engine.start(&id("deaf")).expect_err("nothing listens");
    assert!(matches!(err, HuskError::Io { .. }), "{err}");
    assert!(!prestart_marker.exists());
    assert_eq!(
        engine.state(&id("deaf")).expect("state").status,
        Status::Created
    );

    child.kill().expect("kill");
    let _ = child.wait().expect("reap");
}

// ── Kill ──────────────────────────────────────────────────────────────

#[test]
fn kill_created_container_delivers_signal_and_stops() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let (mut child, pid) = sleeper();
    let _ = fabricate(&engine, "victim", Status::Created, Some(pid), PROCESS_SPEC);

    let state = engine.kill(&id("victim"), Signal::SIGKILL).expect("kill");
    assert_eq!(state.status, Status::Stopped);

    let status = child.wait().expect("reap");
    assert!(!status.success());
    assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
}

#[test]
fn kill_running_container_with_gone_process_still_stops() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let (mut child, pid) = sleeper();
    child.kill().expect("kill child");
    let _ = child.wait().expect("reap");
    let _ = fabricate(&engine, "gone", Status::Running, Some(pid), PROCESS_SPEC);

    let state = engine.kill(&id("gone"), Signal::SIGTERM).expect("kill");
    assert_eq!(state.status, Status::Stopped);
}

#[test]
fn kill_stopped_container_is_invalid_state() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let _ = fabricate(&engine, "done", Status::Stopped, None, PROCESS_SPEC);

    let err = engine.kill(&id("done"), Signal::SIGTERM).expect_err("stopped");
    assert!(matches!(
        err,
        HuskError::InvalidState {
            status: Status::Stopped,
            operation: "kill",
            ..
        }
    ));
}

// ── Delete ────────────────────────────────────────────────────────────

#[test]
fn delete_requires_stopped_unless_forced() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let (mut child, pid) = sleeper();
    let _ = fabricate(&engine, "busy", Status::Running, Some(pid), PROCESS_SPEC);
    let dir = engine.config().paths(&id("busy")).dir().to_path_buf();

    let err = engine.delete(&id("busy"), false).expect_err("not stopped");
    assert!(matches!(err, HuskError::InvalidState { operation: "delete", .. }));
    assert!(dir.exists());

    engine.delete(&id("busy"), true).expect("forced delete");
    assert!(!dir.exists());
    assert!(!child.wait().expect("reap").success());
}

#[test]
fn delete_stopped_container_removes_sockets_and_files() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let _ = fabricate(&engine, "old", Status::Stopped, None, PROCESS_SPEC);
    let paths = engine.config().paths(&id("old"));
    let _init = UnixListener::bind(paths.init_socket()).expect("bind init");
    let _ctr = UnixListener::bind(paths.container_socket()).expect("bind container");
    std::fs::write(paths.rootfs().join("file"), b"x").expect("write");

    engine.delete(&id("old"), false).expect("delete");
    assert!(!paths.dir().exists());
    assert!(matches!(
        engine.state(&id("old")),
        Err(HuskError::NotFound { .. })
    ));
}

#[test]
fn delete_kills_process_that_outlived_its_stop() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let (mut child, pid) = sleeper();
    let _ = fabricate(&engine, "stubborn", Status::Stopped, Some(pid), PROCESS_SPEC);

    engine.delete(&id("stubborn"), false).expect("delete");
    assert!(!engine.config().paths(&id("stubborn")).dir().exists());
    assert_eq!(child.wait().expect("reap").signal(), Some(Signal::SIGKILL as i32));
}

#[test]
fn forced_delete_waits_for_exit_and_removes_cgroup() {
    let root = tempfile::tempdir().expect("root");
    let cgroup_root = tempfile::tempdir().expect("cgroup root");
    std::fs::write(cgroup_root.path().join("cgroup.controllers"), "").expect("write");
    let cgroup_dir = cgroup_root.path().join("husk-test/pinned");
    std::fs::create_dir_all(&cgroup_dir).expect("mkdir cgroup");

    let engine = Engine::new(HuskConfig {
        cgroup_root: cgroup_root.path().to_path_buf(),
        ..HuskConfig::with_root(root.path())
    });
    let spec = r#"{
        "ociVersion": "1.2.0",
        "root": { "path": "rootfs" },
        "process": { "cwd": "/", "args": ["/bin/sh"] },
        "linux": { "cgroupsPath": "/husk-test/pinned" }
    }"#;
    let (mut child, pid) = sleeper();
    let _ = fabricate(&engine, "pinned", Status::Running, Some(pid), spec);

    engine.delete(&id("pinned"), true).expect("forced delete");
    assert!(!cgroup_dir.exists());
    assert!(!engine.config().paths(&id("pinned")).dir().exists());
    assert_eq!(child.wait().expect("reap").signal(), Some(Signal::SIGKILL as i32));
}

#[test]
fn delete_unknown_container_is_not_found() {
    let root = tempfile::tempdir().expect("root");
    let err = engine(root.path())
        .delete(&id("ghost"), true)
        .expect_err("missing");
    assert!(matches!(err, HuskError::NotFound { .. }));
}

// ── Create ────────────────────────────────────────────────────────────

fn bundle_with(config: &str) -> tempfile::TempDir {
    let bundle = tempfile::tempdir().expect("bundle");
    std::fs::create_dir_all(bundle.path().join("rootfs/bin")).expect("mkdir");
    std::fs::write(bundle.path().join("rootfs/bin/app"), b"app").expect("write");
    std::fs::write(bundle.path().join("config.json"), config).expect("write config");
    bundle
}

fn create_options(name: &str, bundle: &Path) -> CreateOptions {
    CreateOptions {
        id: id(name),
        bundle: bundle.to_path_buf(),
        console_socket: None,
        pid_file: None,
    }
}

#[test]
fn create_with_existing_id_is_already_exists() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let _ = fabricate(&engine, "dup", Status::Stopped, None, NO_PROCESS_SPEC);
    let bundle = bundle_with(NO_PROCESS_SPEC);

    let err = engine
        .create(&create_options("dup", bundle.path()))
        .expect_err("duplicate");
    assert!(matches!(err, HuskError::AlreadyExists { .. }));
}

#[test]
fn create_with_invalid_bundle_leaves_nothing_behind() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let bundle = bundle_with(r#"{ "ociVersion": "1.2.0" }"#);

    let err = engine
        .create(&create_options("broken", bundle.path()))
        .expect_err("no root");
    assert!(matches!(err, HuskError::Validation { .. }));
    assert!(!engine.config().paths(&id("broken")).dir().exists());
}

#[test]
fn failing_create_runtime_hook_tears_down_and_runs_poststop() {
    let root = tempfile::tempdir().expect("root");
    let engine = engine(root.path());
    let marker = root.path().join("poststop-ran");
    let config = format!(
        r#"{{
            "ociVersion": "1.2.0",
            "root": {{ "path": "rootfs" }},
            "hooks": {{
                "createRuntime": [
                    {{ "path": "/bin/sh", "args": ["sh", "-c", "exit 7"] }}
                ],
                "poststop": [
                    {{
                        "path": "/bin/sh",
                        "args": ["sh", "-c", "cat > {marker}"],
                        "env": ["PATH=/usr/bin:/bin"]
                    }}
                ]
            }}
        }}"#,
        marker = marker.display()
    );
    let bundle = bundle_with(&config);

    let err = engine
        .create(&create_options("hooked", bundle.path()))
        .expect_err("hook fails");
    assert!(matches!(err, HuskError::HookFailed { .. }), "{err}");
    assert!(!engine.config().paths(&id("hooked")).dir().exists());

    let seen = std::fs::read_to_string(&marker).expect("poststop output");
    assert!(seen.contains("\"status\":\"stopped\""), "{seen}");
}
