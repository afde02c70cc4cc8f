//! Workpod Protocol Definitions
//!
//! This crate defines the wire formats shared by the daemon, its clients and
//! remote workspace agents:
//!
//! - [`exec`]: the tag-prefixed message framing used to multiplex a remote
//!   command's stdin/stdout/stderr/exit code over one message tunnel
//! - [`varint`]: signed variable-length integers (exit code payloads)
//! - [`daemon`]: the IPC discriminator byte and the local control API payloads

pub mod daemon;
pub mod exec;
pub mod varint;

pub use daemon::{DaemonState, StatusResponse, VersionResponse, DAEMON_MARKER};
pub use exec::{ExecMessage, MessageType, ProtoError, StreamKind};

/// Default maximum size of a single tunnel message, tag byte included.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024;
