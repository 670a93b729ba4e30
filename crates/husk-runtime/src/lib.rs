//! Container lifecycle management for the husk runtime.
//!
//! [`engine::Engine`] drives `create`, `start`, `kill`, `delete` and
//! `state` against the on-disk container entries. The launcher module holds
//! both stages of process creation; stage two is reached through the hidden
//! `init` subcommand of the same binary.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bundle;
pub mod engine;
pub mod hooks;
pub mod ipc;
pub mod launcher;
pub mod process;
pub mod signal;
pub mod state;
