//! Unified error types for the husk workspace.
//!
//! Every variant carries the operation or resource it concerns, so the CLI
//! can print a single descriptive line and exit non-zero.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Status;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HuskError {
    /// An I/O operation on a filesystem path failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Input (bundle, spec, identifier) is invalid.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// A container with this ID already exists on disk.
    #[error("container {id} already exists")]
    AlreadyExists {
        /// Identifier of the existing container.
        id: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The operation is not legal for the container's current status.
    #[error("cannot {operation} container {id}: status is {status}")]
    InvalidState {
        /// Container identifier.
        id: String,
        /// Status found on disk.
        status: Status,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// A system call failed.
    #[error("{context}: {source}")]
    Syscall {
        /// Operation and subject of the failed call.
        context: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// The ready/start handshake was violated.
    #[error("handshake protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// A hook exited unsuccessfully.
    #[error("hook {path} failed: {reason}")]
    HookFailed {
        /// Hook executable.
        path: PathBuf,
        /// Exit status and captured output.
        reason: String,
    },

    /// A hook ran past its timeout and was killed.
    #[error("hook {path} timed out after {timeout_secs}s")]
    HookTimeout {
        /// Hook executable.
        path: PathBuf,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HuskError {
    /// Builds a [`HuskError::Syscall`] from anything convertible to an I/O error,
    /// including `nix::errno::Errno`.
    pub fn syscall(context: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        Self::Syscall {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Builds a [`HuskError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`HuskError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Builds a [`HuskError::Protocol`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` for both hook failure variants.
    pub const fn is_hook_error(&self) -> bool {
        matches!(self, Self::HookFailed { .. } | Self::HookTimeout { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HuskError>;
