//! HTTP header processing module for encoding and decoding headers
//!
//! # Components
//!
//! - [`HeaderDecoder`]: Decodes a request line and header block into a
//!   [`Request`](crate::protocol::Request)
//!   - Enforces the header size and header count limits
//!   - Leaves any body bytes in the buffer
//!
//! - [`HeaderEncoder`]: Encodes a [`Response`](crate::protocol::Response) header
//!   - Fixed field order, `key:value` lines

mod header_decoder;
mod header_encoder;

pub use header_decoder::DEFAULT_MAX_HEADER_BYTES;
pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
