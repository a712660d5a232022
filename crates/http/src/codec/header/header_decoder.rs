//! HTTP header decoder implementation for parsing HTTP request headers
//!
//! This module decodes a request line and header block from raw bytes into a
//! [`Request`]. Tokenising is done by `httparse`; the request model rules (method
//! allow-list, lower-cased keys, last-write-wins duplicates, derived fields) are applied
//! on top of it.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: configurable, 16,000 bytes by default
//! - Only HTTP/1.0 and HTTP/1.1 request lines are accepted
//!
//! Header values may be empty (`X-Flag:`); they are stored as empty strings.

use bytes::{Buf, BytesMut};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{FieldMap, ParseError, Request};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Default maximum size in bytes allowed for the entire header section
pub const DEFAULT_MAX_HEADER_BYTES: usize = 16_000;

/// Decoder for HTTP request headers implementing the [`Decoder`] trait.
///
/// On success the header bytes are consumed from the buffer; any bytes after the blank
/// line (the request body) stay in place for the body reader.
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    max_header_size: usize,
}

impl HeaderDecoder {
    pub fn new(max_header_size: usize) -> Self {
        Self { max_header_size }
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES)
    }
}

impl Decoder for HeaderDecoder {
    type Item = Request;
    type Error = ParseError;

    /// Attempts to decode a request header from the provided bytes buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(request))` if a complete header was successfully parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if parsing failed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Minimum valid HTTP request needs at least "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let parsed_result = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            Error::Version => ParseError::InvalidVersion,
            Error::HeaderName | Error::HeaderValue => ParseError::invalid_header(e),
            e => ParseError::invalid_request_line(e),
        });

        match parsed_result? {
            Status::Complete(body_offset) => {
                trace!(header_size = body_offset, "parsed request header");
                ensure!(
                    body_offset <= self.max_header_size,
                    ParseError::too_large_header(body_offset, self.max_header_size)
                );

                let method = req.method.ok_or_else(|| ParseError::invalid_request_line("missing method"))?;
                let target = req.path.ok_or_else(|| ParseError::invalid_request_line("missing target"))?;
                let version_minor = req.version.ok_or(ParseError::InvalidVersion)?;

                let mut fields = FieldMap::with_capacity(req.headers.len());
                for header in req.headers.iter() {
                    let key = header.name.trim().to_ascii_lowercase();
                    let value = String::from_utf8_lossy(header.value).trim().to_string();
                    fields.insert(key, value);
                }

                let request = Request::from_parts(method, target, version_minor, fields)?;
                src.advance(body_offset);
                Ok(Some(request))
            }
            // If parsing incomplete, ensure current buffer size does not exceed limit
            Status::Partial => {
                ensure!(src.len() <= self.max_header_size, ParseError::too_large_header(src.len(), self.max_header_size));
                Ok(None)
            }
        }
    }
}
