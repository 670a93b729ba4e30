//! Two-stage container process launch.
//!
//! Stage one ([`spawn`]) runs in the controller: it clones a child into
//! the requested namespaces and re-executes the current binary through the
//! hidden `init` subcommand. Stage two ([`init`]) is that re-executed
//! process: it finishes namespace entry, builds the rootfs, performs the
//! ready/start handshake and finally replaces itself with the user program.

pub mod init;
pub mod spawn;

pub use spawn::spawn;
