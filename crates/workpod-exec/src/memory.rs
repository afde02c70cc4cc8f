//! In-process message tunnel
//!
//! Connects two exec endpoints inside one process. Used when the daemon runs a
//! command locally on behalf of a client and throughout the tests.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::tunnel::{TunnelError, TunnelReceiver, TunnelResult, TunnelSender};

#[derive(Debug)]
enum Frame {
    Message(Bytes),
    Close,
}

/// Sending half of an in-memory tunnel
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::Sender<Frame>,
    max_message_size: usize,
}

/// Receiving half of an in-memory tunnel
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Frame>,
}

/// One side of an in-memory tunnel
pub type MemoryEnd = (MemorySender, MemoryReceiver);

/// Create a connected pair of tunnel ends
pub fn pair(max_message_size: usize) -> (MemoryEnd, MemoryEnd) {
    let (a_tx, a_rx) = mpsc::channel(64);
    let (b_tx, b_rx) = mpsc::channel(64);

    (
        (
            MemorySender {
                tx: a_tx,
                max_message_size,
            },
            MemoryReceiver { rx: b_rx },
        ),
        (
            MemorySender {
                tx: b_tx,
                max_message_size,
            },
            MemoryReceiver { rx: a_rx },
        ),
    )
}

#[async_trait]
impl TunnelSender for MemorySender {
    async fn send(&self, message: Bytes) -> TunnelResult<()> {
        if message.len() > self.max_message_size {
            return Err(TunnelError::MessageTooLarge {
                size: message.len(),
                max: self.max_message_size,
            });
        }
        self.tx
            .send(Frame::Message(message))
            .await
            .map_err(|_| TunnelError::Closed)
    }

    async fn ping(&self) -> TunnelResult<()> {
        if self.tx.is_closed() {
            return Err(TunnelError::Closed);
        }
        Ok(())
    }

    async fn close(&self) -> TunnelResult<()> {
        // The peer may already be gone
        let _ = self.tx.send(Frame::Close).await;
        Ok(())
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

#[async_trait]
impl TunnelReceiver for MemoryReceiver {
    async fn recv(&mut self) -> TunnelResult<Option<Bytes>> {
        match self.rx.recv().await {
            Some(Frame::Message(message)) => Ok(Some(message)),
            Some(Frame::Close) | None => Ok(None),
        }
    }
}
