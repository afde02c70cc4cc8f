//! Remote exec message framing
//!
//! The tunnel underneath only supports discrete message sends and receives, so
//! every message carries its own type:
//!
//! ```text
//! [tag: 1 byte][payload: rest of message]
//! ```
//!
//! Data messages carry opaque bytes, `ExitCode` carries a signed varint and
//! close messages carry nothing.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::varint::{put_varint, read_varint, MAX_VARINT_LEN};

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Empty message")]
    EmptyMessage,

    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Unexpected payload of {len} bytes for {message_type:?}")]
    UnexpectedPayload {
        message_type: MessageType,
        len: usize,
    },

    #[error("Incomplete varint")]
    IncompleteVarint,

    #[error("Varint overflows 64 bits")]
    VarintOverflow,
}

/// Message tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    StdoutData = 0,
    StdoutClose = 1,
    StderrData = 2,
    StderrClose = 3,
    StdinData = 4,
    StdinClose = 5,
    ExitCode = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::StdoutData),
            1 => Ok(MessageType::StdoutClose),
            2 => Ok(MessageType::StderrData),
            3 => Ok(MessageType::StderrClose),
            4 => Ok(MessageType::StdinData),
            5 => Ok(MessageType::StdinClose),
            6 => Ok(MessageType::ExitCode),
            _ => Err(ProtoError::InvalidMessageType(value)),
        }
    }
}

/// One of the logical streams carried by an exec session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Tag used for data on this stream
    pub fn data_type(self) -> MessageType {
        match self {
            StreamKind::Stdin => MessageType::StdinData,
            StreamKind::Stdout => MessageType::StdoutData,
            StreamKind::Stderr => MessageType::StderrData,
        }
    }

    /// Tag used to close this stream
    pub fn close_type(self) -> MessageType {
        match self {
            StreamKind::Stdin => MessageType::StdinClose,
            StreamKind::Stdout => MessageType::StdoutClose,
            StreamKind::Stderr => MessageType::StderrClose,
        }
    }
}

/// A decoded exec message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecMessage {
    StdoutData(Bytes),
    StdoutClose,
    StderrData(Bytes),
    StderrClose,
    StdinData(Bytes),
    StdinClose,
    ExitCode(i64),
}

impl ExecMessage {
    /// Data message for the given stream
    pub fn data(kind: StreamKind, payload: Bytes) -> Self {
        match kind {
            StreamKind::Stdin => ExecMessage::StdinData(payload),
            StreamKind::Stdout => ExecMessage::StdoutData(payload),
            StreamKind::Stderr => ExecMessage::StderrData(payload),
        }
    }

    /// Close message for the given stream
    pub fn close(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Stdin => ExecMessage::StdinClose,
            StreamKind::Stdout => ExecMessage::StdoutClose,
            StreamKind::Stderr => ExecMessage::StderrClose,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ExecMessage::StdoutData(_) => MessageType::StdoutData,
            ExecMessage::StdoutClose => MessageType::StdoutClose,
            ExecMessage::StderrData(_) => MessageType::StderrData,
            ExecMessage::StderrClose => MessageType::StderrClose,
            ExecMessage::StdinData(_) => MessageType::StdinData,
            ExecMessage::StdinClose => MessageType::StdinClose,
            ExecMessage::ExitCode(_) => MessageType::ExitCode,
        }
    }

    /// Encode to a single tunnel message
    pub fn encode(&self) -> Bytes {
        let tag = self.message_type() as u8;
        match self {
            ExecMessage::StdoutData(payload)
            | ExecMessage::StderrData(payload)
            | ExecMessage::StdinData(payload) => {
                let mut buf = BytesMut::with_capacity(1 + payload.len());
                buf.put_u8(tag);
                buf.put_slice(payload);
                buf.freeze()
            }
            ExecMessage::ExitCode(code) => {
                let mut buf = BytesMut::with_capacity(1 + MAX_VARINT_LEN);
                buf.put_u8(tag);
                put_varint(&mut buf, *code);
                buf.freeze()
            }
            _ => Bytes::copy_from_slice(&[tag]),
        }
    }

    /// Decode a single tunnel message
    pub fn decode(mut raw: Bytes) -> Result<Self, ProtoError> {
        if raw.is_empty() {
            return Err(ProtoError::EmptyMessage);
        }

        let message_type = MessageType::try_from(raw[0])?;
        let payload = raw.split_off(1);

        let message = match message_type {
            MessageType::StdoutData => ExecMessage::StdoutData(payload),
            MessageType::StderrData => ExecMessage::StderrData(payload),
            MessageType::StdinData => ExecMessage::StdinData(payload),
            MessageType::ExitCode => {
                let (code, _) = read_varint(&payload)?;
                ExecMessage::ExitCode(code)
            }
            close_type => {
                if !payload.is_empty() {
                    return Err(ProtoError::UnexpectedPayload {
                        message_type: close_type,
                        len: payload.len(),
                    });
                }
                match close_type {
                    MessageType::StdoutClose => ExecMessage::StdoutClose,
                    MessageType::StderrClose => ExecMessage::StderrClose,
                    _ => ExecMessage::StdinClose,
                }
            }
        };

        Ok(message)
    }
}
