//! # husk-common
//!
//! Shared types, error definitions, configuration models, constants, and the
//! in-memory OCI runtime spec used across the husk workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and holds no Linux-specific code.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod spec;
pub mod types;
