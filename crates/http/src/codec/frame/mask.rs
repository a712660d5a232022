/// XORs `buf` with the masking key in place.
///
/// `offset` is the position of `buf[0]` within the whole frame payload, so a payload
/// delivered over several reads is unmasked with a continuous key cursor.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4], offset: u64) {
    let shift = (offset % 4) as usize;
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[(shift + i) % 4];
    }
}
