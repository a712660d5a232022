//! Decoder for client-to-server frame headers.
//!
//! The decoder consumes exactly the header bytes (2 to 14) and leaves the payload in the
//! buffer. Frames that a server must never accept are rejected here: reserved bits set,
//! unknown opcodes, unmasked frames and 64-bit lengths that do not fit in 32 bits.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use super::{FrameHeader, OpCode};
use crate::ensure;
use crate::protocol::WebSocketError;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0f;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7f;

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl Decoder for FrameDecoder {
    type Item = FrameHeader;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let first = src[0];
        let second = src[1];

        ensure!(first & RSV_BITS == 0, WebSocketError::invalid_frame("reserved bits must be zero"));
        let opcode = OpCode::try_from(first & OPCODE_BITS)
            .map_err(|code| WebSocketError::invalid_frame(format!("unknown opcode {code:#x}")))?;
        ensure!(second & MASK_BIT != 0, WebSocketError::invalid_frame("client frames must be masked"));

        let extended_len = match second & LEN_BITS {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + extended_len + 4;
        if src.len() < header_len {
            src.reserve(header_len - src.len());
            return Ok(None);
        }

        let payload_len = match extended_len {
            2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
            8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&src[2..10]);
                ensure!(bytes[..4] == [0, 0, 0, 0], WebSocketError::FrameTooLong);
                u64::from_be_bytes(bytes)
            }
            _ => u64::from(second & LEN_BITS),
        };

        let mut mask = [0u8; 4];
        mask.copy_from_slice(&src[2 + extended_len..header_len]);
        src.advance(header_len);

        Ok(Some(FrameHeader { fin: first & FIN_BIT != 0, opcode, payload_len, mask: Some(mask) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [1, 2, 3, 4];

    #[test]
    fn short_frame() {
        let mut src = BytesMut::from(&[0x81, 0x85, 1, 2, 3, 4, b'x'][..]);
        let header = FrameDecoder.decode(&mut src).unwrap().unwrap();

        assert_eq!(header, FrameHeader::new(true, OpCode::Text, 5).with_mask(MASK));
        assert_eq!(&src[..], b"x");
    }

    #[test]
    fn extended_lengths() {
        let mut src = BytesMut::from(&[0x02, 0xfe, 0x01, 0x00, 1, 2, 3, 4][..]);
        let header = FrameDecoder.decode(&mut src).unwrap().unwrap();
        assert!(!header.fin);
        assert_eq!(header.opcode, OpCode::Binary);
        assert_eq!(header.payload_len, 256);

        let mut src = BytesMut::from(&[0x82, 0xff, 0, 0, 0, 0, 0, 1, 0, 0, 1, 2, 3, 4][..]);
        let header = FrameDecoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(header.payload_len, 65536);
        assert!(src.is_empty());
    }

    #[test]
    fn incomplete_header_needs_more() {
        let mut src = BytesMut::from(&[0x81][..]);
        assert!(FrameDecoder.decode(&mut src).unwrap().is_none());

        let mut src = BytesMut::from(&[0x81, 0xfe, 0x01, 0x00, 1][..]);
        assert!(FrameDecoder.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 5);
    }

    #[test]
    fn rejects_invalid_frames() {
        let mut reserved = BytesMut::from(&[0xc1, 0x80, 1, 2, 3, 4][..]);
        assert!(matches!(FrameDecoder.decode(&mut reserved), Err(WebSocketError::InvalidFrame { .. })));

        let mut opcode = BytesMut::from(&[0x83, 0x80, 1, 2, 3, 4][..]);
        assert!(matches!(FrameDecoder.decode(&mut opcode), Err(WebSocketError::InvalidFrame { .. })));

        let mut unmasked = BytesMut::from(&[0x81, 0x01, b'x'][..]);
        assert!(matches!(FrameDecoder.decode(&mut unmasked), Err(WebSocketError::InvalidFrame { .. })));

        let mut huge = BytesMut::from(&[0x82, 0xff, 0, 0, 0, 1, 0, 0, 0, 0, 1, 2, 3, 4][..]);
        assert!(matches!(FrameDecoder.decode(&mut huge), Err(WebSocketError::FrameTooLong)));
    }
}
