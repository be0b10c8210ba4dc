use std::borrow::Cow;

use crate::error::MessageTooLarge;

/// Inbound reassembly state of one connection.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum Assembly {
    /// No message in progress.
    #[default]
    Idle,
    /// Payload of the non-final frames received so far.
    Accumulating(Vec<u8>),
}

/// Joins data frames into complete application messages.
///
/// Every data frame (text, binary or continuation) with `fin = 0` is appended
/// to the held bytes; the first frame with `fin = 1` completes the message and
/// returns the reassembler to [`Assembly::Idle`].
#[derive(Debug)]
pub struct Reassembler {
    state: Assembly,
    max_message_size: usize,
}

impl Reassembler {
    pub const fn new(max_message_size: usize) -> Self {
        Self {
            state: Assembly::Idle,
            max_message_size,
        }
    }

    pub const fn state(&self) -> &Assembly {
        &self.state
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.state, Assembly::Idle)
    }

    /// Feeds the payload of one data frame.
    ///
    /// Returns the complete message once a final frame arrives. A single
    /// unfragmented frame is handed back without copying. Exceeding the size
    /// limit discards the held bytes.
    pub fn push<'p>(
        &mut self,
        fin: bool,
        payload: &'p [u8],
    ) -> Result<Option<Cow<'p, [u8]>>, MessageTooLarge> {
        let max = self.max_message_size;

        match (std::mem::take(&mut self.state), fin) {
            (Assembly::Idle, _) if payload.len() > max => Err(MessageTooLarge { max }),
            (Assembly::Idle, true) => Ok(Some(Cow::Borrowed(payload))),
            (Assembly::Idle, false) => {
                self.state = Assembly::Accumulating(payload.to_vec());

                Ok(None)
            }
            (Assembly::Accumulating(held), _) if held.len() + payload.len() > max => {
                Err(MessageTooLarge { max })
            }
            (Assembly::Accumulating(mut held), fin) => {
                held.extend_from_slice(payload);

                if fin {
                    return Ok(Some(Cow::Owned(held)));
                }

                self.state = Assembly::Accumulating(held);

                Ok(None)
            }
        }
    }
}

/// Splits an outgoing payload into `(chunk, fin)` pieces of at most
/// `fragment_size` bytes. An empty payload, or a `fragment_size` of `0`,
/// yields the whole payload as one final piece.
#[derive(Debug)]
pub(crate) enum Fragments<'a> {
    Once(core::iter::Once<(&'a [u8], bool)>),
    Iter(Iter<'a>),
}

impl<'a> Fragments<'a> {
    pub(crate) fn new(data: &'a [u8], fragment_size: usize) -> Self {
        match (data.len(), fragment_size) {
            (0, _) | (_, 0) => Self::Once(core::iter::once((data, true))),
            _ => Self::Iter(Iter::new(data, fragment_size)),
        }
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = (&'a [u8], bool);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Once(iter) => iter.next(),
            Self::Iter(iter) => iter.next(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Iter<'a> {
    data: &'a [u8],
    fragment_size: usize,
    pos: usize,
}

impl<'a> Iter<'a> {
    /// `fragment_size` must not be `0`; [`Fragments::new`] never passes it.
    fn new(data: &'a [u8], fragment_size: usize) -> Self {
        Self {
            data,
            fragment_size,
            pos: 0,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let end = (self.pos + self.fragment_size).min(self.data.len());
        self.pos = end;

        Some((&self.data[start..end], end == self.data.len()))
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, RngCore, SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn single_final_frame_is_borrowed() {
        let mut reassembler = Reassembler::new(64);

        let message = reassembler.push(true, b"hello").unwrap().unwrap();

        assert!(matches!(message, Cow::Borrowed(b"hello")));
        assert!(reassembler.is_idle());
    }

    #[test]
    fn continuation_frames_are_joined() {
        let mut reassembler = Reassembler::new(64);

        assert_eq!(reassembler.push(false, b"Hel").unwrap(), None);
        assert_eq!(
            reassembler.state(),
            &Assembly::Accumulating(b"Hel".to_vec())
        );
        assert_eq!(reassembler.push(false, b"l").unwrap(), None);

        let message = reassembler.push(true, b"o").unwrap().unwrap();

        assert_eq!(&*message, b"Hello");
        assert!(reassembler.is_idle());
    }

    #[test]
    fn any_split_reassembles_the_original() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..64 {
            let mut message = vec![0u8; rng.random_range(0..512)];
            rng.fill_bytes(&mut message);

            let size = rng.random_range(1..64);
            let mut reassembler = Reassembler::new(1024);
            let mut assembled = None;

            for (chunk, fin) in Fragments::new(&message, size) {
                assert!(assembled.is_none(), "message completed before the final frame");

                assembled = reassembler.push(fin, chunk).unwrap().map(Cow::into_owned);
            }

            assert_eq!(assembled.as_deref(), Some(message.as_slice()));
            assert!(reassembler.is_idle());
        }
    }

    #[test]
    fn limit_applies_to_the_assembled_message() {
        let mut reassembler = Reassembler::new(4);

        assert_eq!(reassembler.push(false, b"abc").unwrap(), None);
        assert!(reassembler.push(true, b"de").is_err());
        assert!(reassembler.is_idle());

        assert!(reassembler.push(true, b"abcde").is_err());
        assert_eq!(&*reassembler.push(true, b"abcd").unwrap().unwrap(), b"abcd");
    }

    #[test]
    fn fragments_mark_only_the_last_piece_final() {
        let pieces: Vec<_> = Fragments::new(b"abcdefg", 3).collect();

        assert_eq!(
            pieces,
            [(&b"abc"[..], false), (&b"def"[..], false), (&b"g"[..], true)]
        );
    }

    #[test]
    fn empty_payload_is_one_final_piece() {
        let pieces: Vec<_> = Fragments::new(&[], 3).collect();

        assert_eq!(pieces, [(&b""[..], true)]);
    }

    #[test]
    fn zero_fragment_size_is_one_final_piece() {
        let pieces: Vec<_> = Fragments::new(b"abc", 0).collect();

        assert_eq!(pieces, [(&b"abc"[..], true)]);
    }
}
