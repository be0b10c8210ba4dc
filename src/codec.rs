use crate::{
    Frame, Header, OpCode,
    error::DecodeError,
    frame::MIN_HEADER_LEN,
};

/// Largest payload a control frame may carry.
const MAX_CONTROL_PAYLOAD: usize = 125;

/// Converts between raw bytes and frames.
///
/// Decoding never consumes anything on its own: it reports how many bytes the
/// frame spans and the caller advances its buffer. `Ok(None)` means the
/// buffer ends inside the frame (header included) and more bytes are needed.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    /// Creates a codec rejecting frames that declare more than
    /// `max_payload_len` payload bytes.
    pub const fn new(max_payload_len: usize) -> Self {
        Self { max_payload_len }
    }

    pub const fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Reads one frame header from the start of `src`.
    pub fn decode_header(&self, src: &[u8]) -> Result<Option<Header>, DecodeError> {
        if src.len() < MIN_HEADER_LEN {
            return Ok(None);
        }

        let fin = src[0] & 0b1000_0000 != 0;
        let rsv = (src[0] & 0b0111_0000) >> 4;
        let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
        let masked = src[1] & 0b1000_0000 != 0;

        let length_code = src[1] & 0x7F;
        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };

        let header_len = MIN_HEADER_LEN + extra + masked as usize * 4;

        if src.len() < header_len {
            return Ok(None);
        }

        let declared = match extra {
            0 => u64::from(length_code),
            2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
            _ => u64::from_be_bytes([
                src[2], src[3], src[4], src[5], src[6], src[7], src[8], src[9],
            ]),
        };

        if opcode.is_control() {
            if !fin {
                return Err(DecodeError::ControlFrameFragmented);
            }

            if declared > MAX_CONTROL_PAYLOAD as u64 {
                return Err(DecodeError::ControlFrameTooLarge);
            }
        }

        let payload_len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= self.max_payload_len)
            .ok_or(DecodeError::PayloadTooLarge {
                len: declared,
                max: self.max_payload_len,
            })?;

        let mask = masked.then(|| {
            let at = MIN_HEADER_LEN + extra;

            [src[at], src[at + 1], src[at + 2], src[at + 3]]
        });

        Ok(Some(Header::decoded(
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            header_len,
        )))
    }

    /// Reads one complete frame from the start of `src`, unmasking its
    /// payload in place.
    ///
    /// Returns the frame together with the number of bytes it spans. Nothing
    /// is modified when the frame is incomplete.
    pub fn decode<'buf>(
        &self,
        src: &'buf mut [u8],
    ) -> Result<Option<(Frame<'buf>, usize)>, DecodeError> {
        let header = match self.decode_header(src)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let frame_len = header.frame_len();

        if src.len() < frame_len {
            return Ok(None);
        }

        let payload = &mut src[header.header_len()..frame_len];

        if let Some(mask) = header.mask() {
            crate::mask::unmask(payload, mask);
        }

        Ok(Some((Frame::new(header, payload), frame_len)))
    }

    /// Appends one unmasked frame to `dst`.
    ///
    /// Servers never mask what they send.
    pub fn encode(fin: bool, opcode: OpCode, payload: &[u8], dst: &mut Vec<u8>) {
        let header = Header::new(fin, opcode, payload.len());

        dst.reserve(header.frame_len());
        header.write(dst);
        dst.extend_from_slice(payload);
    }
}
