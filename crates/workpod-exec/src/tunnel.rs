//! Message tunnel abstraction
//!
//! An exec session needs a duplex channel that moves whole messages, answers
//! keep-alive pings and can be closed with a normal-closure frame. The send
//! half is shared by the outbound pump and the keep-alive routine, so it takes
//! `&self`; the receive half is owned by the inbound demultiplexer.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Tunnel closed")]
    Closed,

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid tunnel request: {0}")]
    InvalidRequest(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

pub type TunnelResult<T> = Result<T, TunnelError>;

/// Sending half of a message tunnel
#[async_trait]
pub trait TunnelSender: Send + Sync {
    /// Send one binary message
    async fn send(&self, message: Bytes) -> TunnelResult<()>;

    /// Send a transport-level ping
    async fn ping(&self) -> TunnelResult<()>;

    /// Send a normal-closure control frame and stop sending
    async fn close(&self) -> TunnelResult<()>;

    /// Largest message the peer accepts, tag byte included
    fn max_message_size(&self) -> usize;
}

/// Receiving half of a message tunnel
#[async_trait]
pub trait TunnelReceiver: Send {
    /// Receive the next binary message, `None` once the tunnel is closed
    async fn recv(&mut self) -> TunnelResult<Option<Bytes>>;
}
