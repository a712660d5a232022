//! Codecs for the two wire formats the server speaks.
//!
//! - [`header`]: HTTP/1.1 request header decoding and response header encoding
//!   - [`HeaderDecoder`]: request line and header fields into a [`Request`](crate::protocol::Request)
//!   - [`HeaderEncoder`]: a [`Response`](crate::protocol::Response) header into bytes
//!
//! - [`frame`]: RFC 6455 frame headers
//!   - [`FrameDecoder`]: masked client frame headers
//!   - [`FrameEncoder`]: server frame headers
//!   - [`apply_mask`]: payload (un)masking
//!
//! All codecs implement [`tokio_util::codec::Decoder`] or [`tokio_util::codec::Encoder`]
//! over a `BytesMut`, so they plug into the read-ahead buffer of the connection stream.
//! Bodies and frame payloads are not decoded here: they stream through the length
//! windows of [`stream`](crate::stream).

pub mod frame;
pub mod header;

pub use frame::{FrameDecoder, FrameEncoder, FrameHeader, OpCode, apply_mask};
pub use header::{DEFAULT_MAX_HEADER_BYTES, HeaderDecoder, HeaderEncoder};
