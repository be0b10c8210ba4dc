/// XORs every payload byte with `mask[i % 4]`.
///
/// Applying the same key twice restores the original bytes, so this both
/// masks and unmasks.
#[inline]
pub fn unmask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
