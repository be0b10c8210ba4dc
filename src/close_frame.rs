use crate::{CloseCode, error::CloseFrameError};

/// The payload of a close frame: a status code and an optional reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseFrame<'a> {
    code: CloseCode,
    reason: &'a str,
}

impl<'a> CloseFrame<'a> {
    /// Creates a new [`CloseFrame`].
    pub const fn new(code: CloseCode, reason: &'a str) -> Self {
        Self { code, reason }
    }

    pub const fn no_reason(code: CloseCode) -> Self {
        Self::new(code, "")
    }

    /// Returns the close code.
    pub const fn code(&self) -> CloseCode {
        self.code
    }

    /// Returns the reason as a string slice.
    pub const fn reason(&self) -> &'a str {
        self.reason
    }

    /// Encoded size: two bytes of code plus the reason.
    pub const fn encoded_len(&self) -> usize {
        2 + self.reason.len()
    }

    /// Parses a close payload. An empty payload carries no status.
    pub fn parse(payload: &'a [u8]) -> Result<Option<Self>, CloseFrameError> {
        match payload {
            [] => Ok(None),
            [_] => Err(CloseFrameError::Truncated),
            [high, low, reason @ ..] => {
                let code = CloseCode::from(u16::from_be_bytes([*high, *low]));
                let reason =
                    core::str::from_utf8(reason).map_err(|_| CloseFrameError::InvalidUTF8)?;

                Ok(Some(Self::new(code, reason)))
            }
        }
    }

    pub fn write(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&u16::from(self.code).to_be_bytes());
        dst.extend_from_slice(self.reason.as_bytes());
    }
}
