//! Remote command execution over a message tunnel
//!
//! Multiplexes an interactive command's stdin, stdout, stderr and exit code
//! over one tunnel that only moves whole messages. The wire format lives in
//! [`workpod_proto::exec`]; this crate provides the pumps that drive it:
//!
//! - [`exec`]: client side, streams local stdin and collects remote output
//! - [`serve_process`]: remote side, runs a child process for a peer
//!
//! Tunnels are abstracted by [`TunnelSender`] / [`TunnelReceiver`]. A
//! WebSocket implementation ([`websocket`]) and an in-process pair
//! ([`memory`]) are provided.

pub mod memory;
pub mod pump;
pub mod server;
pub mod session;
pub mod tunnel;
pub mod websocket;

pub use server::serve_process;
pub use session::{exec, ExecOptions, KEEPALIVE_INTERVAL, PING_TIMEOUT};
pub use tunnel::{TunnelError, TunnelReceiver, TunnelResult, TunnelSender};
pub use websocket::{WebSocketReceiver, WebSocketSender, HANDSHAKE_TIMEOUT};

use thiserror::Error;

/// Exec session errors
///
/// A remote exit code is never an error, whatever its value.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport is dead: {0}")]
    TransportDead(String),

    #[error("Tunnel closed before an exit code was received")]
    MissingExitCode,

    #[error("Tunnel closed by peer")]
    TunnelClosed,

    #[error("Exec session cancelled")]
    Cancelled,
}
