use crate::OpCode;

/// Size of the fixed part of every frame header.
pub(crate) const MIN_HEADER_LEN: usize = 2;

/// A decoded frame header.
///
/// `header_len` counts the fixed bytes, the extended length field and the
/// mask key, so `header_len + payload_len` is the exact span of the frame on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    fin: bool,
    /// The three reserved bits, right aligned. Carried as-is.
    rsv: u8,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
    header_len: usize,
}

impl Header {
    /// Creates an unmasked header for an outgoing frame.
    pub const fn new(fin: bool, opcode: OpCode, payload_len: usize) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            mask: None,
            payload_len,
            header_len: Self::encoded_len(payload_len),
        }
    }

    pub(crate) const fn decoded(
        fin: bool,
        rsv: u8,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload_len: usize,
        header_len: usize,
    ) -> Self {
        Self {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            header_len,
        }
    }

    /// Number of header bytes an unmasked frame of `payload_len` needs.
    pub const fn encoded_len(payload_len: usize) -> usize {
        if payload_len < 126 {
            MIN_HEADER_LEN
        } else if payload_len < 65536 {
            MIN_HEADER_LEN + 2
        } else {
            MIN_HEADER_LEN + 8
        }
    }

    /// Returns whether this is the final frame in a message.
    pub const fn is_final(&self) -> bool {
        self.fin
    }

    pub const fn rsv(&self) -> u8 {
        self.rsv
    }

    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub const fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub const fn header_len(&self) -> usize {
        self.header_len
    }

    /// Header bytes plus payload bytes.
    pub const fn frame_len(&self) -> usize {
        self.header_len + self.payload_len
    }

    /// Appends the header to `dst`.
    ///
    /// The length uses the smallest of the three encodings. The mask bit and
    /// key are written only when the header carries a mask.
    pub fn write(&self, dst: &mut Vec<u8>) {
        dst.push(((self.fin as u8) << 7) | ((self.rsv & 0b111) << 4) | self.opcode.into_u8());

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let len = self.payload_len;

        if len < 126 {
            dst.push(mask_bit | len as u8);
        } else if len < 65536 {
            dst.push(mask_bit | 126);
            dst.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            dst.push(mask_bit | 127);
            dst.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if let Some(mask) = self.mask {
            dst.extend_from_slice(&mask);
        }
    }
}

/// A received frame with its payload already unmasked.
#[derive(Debug)]
pub struct Frame<'a> {
    header: Header,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub(crate) const fn new(header: Header, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }

    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Returns whether this is the final frame in a message.
    pub const fn is_final(&self) -> bool {
        self.header.fin
    }

    pub const fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    pub const fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_minimal_length_tier() {
        for (len, expected) in [
            (0, 2),
            (125, 2),
            (126, 4),
            (65535, 4),
            (65536, 10),
        ] {
            let mut dst = Vec::new();
            Header::new(true, OpCode::Binary, len).write(&mut dst);

            assert_eq!(dst.len(), expected, "payload length {len}");
            assert_eq!(Header::encoded_len(len), expected);
        }
    }

    #[test]
    fn fin_and_opcode_share_the_first_byte() {
        let mut dst = Vec::new();

        Header::new(true, OpCode::Text, 5).write(&mut dst);
        Header::new(false, OpCode::Continuation, 5).write(&mut dst);

        assert_eq!(dst, [0x81, 0x05, 0x00, 0x05]);
    }

    #[test]
    fn extended_lengths_are_big_endian() {
        let mut dst = Vec::new();
        Header::new(true, OpCode::Binary, 300).write(&mut dst);
        assert_eq!(dst, [0x82, 126, 0x01, 0x2c]);

        let mut dst = Vec::new();
        Header::new(true, OpCode::Binary, 70000).write(&mut dst);
        assert_eq!(dst, [0x82, 127, 0, 0, 0, 0, 0, 0x01, 0x11, 0x70]);
    }
}
