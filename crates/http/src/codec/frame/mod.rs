//! WebSocket frame header codec (RFC 6455 section 5.2).
//!
//! Only frame *headers* are decoded and encoded here. Payload bytes are streamed through
//! the connection's window reader and unmasked in place with [`apply_mask`], so a frame
//! never has to be buffered whole.

mod frame_decoder;
mod frame_encoder;
mod mask;

pub use frame_decoder::FrameDecoder;
pub use frame_encoder::FrameEncoder;
pub use mask::apply_mask;

/// The largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Frame opcodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Close, ping and pong are control frames; they may not be fragmented.
    pub fn is_control(&self) -> bool {
        (*self as u8) & 0x8 != 0
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(other),
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload_len: u64,
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// An unmasked header, as the server sends it.
    pub fn new(fin: bool, opcode: OpCode, payload_len: u64) -> Self {
        Self { fin, opcode, payload_len, mask: None }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_classes() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Continuation.is_control());

        assert_eq!(OpCode::try_from(0xA), Ok(OpCode::Pong));
        assert_eq!(OpCode::try_from(0x3), Err(0x3));
    }
}
