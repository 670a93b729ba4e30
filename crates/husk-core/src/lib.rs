//! # husk-core
//!
//! Low-level Linux isolation primitives for the husk runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags, joining by path, UID/GID maps, hostname.
//! - **Filesystem**: the rootfs builder (mounts, devices, symlinks) and
//!   `pivot_root` with masked and read-only paths.
//! - **Cgroups**: v1 and v2 attachment, device rules, and limits.
//! - **Capabilities** and **rlimits**: closed name tables and their appliers.
//! - **Console**: pseudo-terminal handoff over a console socket.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("husk-core requires Linux: namespaces, cgroups and pivot_root have no portable equivalent");

pub mod capability;
pub mod cgroup;
pub mod console;
pub mod filesystem;
pub mod namespace;
pub mod rlimit;
