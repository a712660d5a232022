//! Encoder for frame headers.
//!
//! Lengths below 126 fit in the second byte, lengths below 65536 use the 16-bit form,
//! anything larger the 64-bit form. The masking key is written only when the header
//! carries one; server frames never do.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use super::FrameHeader;
use crate::protocol::WebSocketError;

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder;

impl Encoder<FrameHeader> for FrameEncoder {
    type Error = WebSocketError;

    fn encode(&mut self, header: FrameHeader, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(14);

        let fin = if header.fin { 0x80 } else { 0x00 };
        dst.put_u8(fin | header.opcode as u8);

        let mask_bit = if header.mask.is_some() { 0x80 } else { 0x00 };
        match header.payload_len {
            len if len < 126 => dst.put_u8(mask_bit | len as u8),
            len if len < 65536 => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(len as u16);
            }
            len => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(len);
            }
        }

        if let Some(mask) = header.mask {
            dst.put_slice(&mask);
        }
        Ok(())
    }
}
