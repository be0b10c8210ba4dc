use std::borrow::Cow;

use crate::{CloseFrame, OpCode};

/// A message the server sends to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message<'a> {
    /// A text message
    Text(&'a str),
    /// A binary message
    Binary(&'a [u8]),
    /// A ping message with the specified payload
    ///
    /// The payload here must have a length less than 125 bytes
    Ping(&'a [u8]),
    /// A pong message with the specified payload
    ///
    /// The payload here must have a length less than 125 bytes
    Pong(&'a [u8]),
    /// A close message with the optional close frame.
    Close(Option<CloseFrame<'a>>),
}

impl<'a> Message<'a> {
    pub const fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Ping(_) => OpCode::Ping,
            Message::Pong(_) => OpCode::Pong,
            Message::Close(_) => OpCode::Close,
        }
    }

    /// Get the length of the payload.
    pub const fn len(&self) -> usize {
        match self {
            Message::Text(payload) => payload.len(),
            Message::Binary(payload) | Message::Ping(payload) | Message::Pong(payload) => {
                payload.len()
            }
            Message::Close(Some(frame)) => frame.encoded_len(),
            Message::Close(None) => 0,
        }
    }

    /// Returns true if the message has no payload.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload bytes as they go on the wire. Only close frames allocate.
    pub fn payload(&self) -> Cow<'a, [u8]> {
        match *self {
            Message::Text(payload) => Cow::Borrowed(payload.as_bytes()),
            Message::Binary(payload) | Message::Ping(payload) | Message::Pong(payload) => {
                Cow::Borrowed(payload)
            }
            Message::Close(Some(frame)) => {
                let mut dst = Vec::with_capacity(frame.encoded_len());
                frame.write(&mut dst);

                Cow::Owned(dst)
            }
            Message::Close(None) => Cow::Borrowed(&[]),
        }
    }
}
