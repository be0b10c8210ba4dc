//! Error types.

use std::io;

use crate::ConnectionId;

/// A frame that violates the wire format.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpCode(u8),
    #[error("Control frame fragmented")]
    ControlFrameFragmented,
    #[error("Control frame payload larger than 125 bytes")]
    ControlFrameTooLarge,
    #[error("Payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { len: u64, max: usize },
}

impl DecodeError {
    /// Size violations are answered with a policy close, everything else
    /// drops the connection.
    pub const fn is_size_violation(&self) -> bool {
        matches!(self, DecodeError::PayloadTooLarge { .. })
    }
}

/// The reassembled message grew past the configured limit.
#[derive(Debug, thiserror::Error)]
#[error("Message exceeds the limit of {max} bytes")]
pub struct MessageTooLarge {
    pub max: usize,
}

/// An upgrade request that was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Malformed request: {0}")]
    Malformed(
        #[source]
        #[from]
        httparse::Error,
    ),
    #[error("Invalid method: {0}")]
    InvalidMethod(String),
    #[error("Host rejected: {0:?}")]
    HostRejected(String),
    #[error("Missing Sec-WebSocket-Key header")]
    MissingSecKey,
    #[error("Request header block exceeds {max} bytes")]
    TooLarge { max: usize },
}

/// A close payload that is neither empty nor a status code plus UTF-8 reason.
#[derive(Debug, thiserror::Error)]
pub enum CloseFrameError {
    #[error("Close payload of one byte")]
    Truncated,
    #[error("Invalid UTF-8 in close reason")]
    InvalidUTF8,
}

/// A message the engine could not send.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    #[error("Connection {0} is closing")]
    Closed(ConnectionId),
    #[error("Pending send queue is full ({capacity} entries)")]
    PendingQueueFull { capacity: usize },
    #[error("Outbound backlog exceeds {max} bytes")]
    BacklogFull { max: usize },
    #[error("Control frames cannot be fragmented")]
    ControlFragment,
    #[error("Fragment size must be greater than 0")]
    InvalidFragmentSize,
    #[error("Write error: {0}")]
    Io(
        #[source]
        #[from]
        io::Error,
    ),
}
