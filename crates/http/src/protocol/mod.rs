//! Core HTTP protocol abstractions.
//!
//! This module holds the message model shared by the codecs, the connection supervisor
//! and the handler:
//!
//! - **Request** ([`request`]): the parsed request header, immutable once handed out
//!   - [`Request`]: method, path, query, fragment, headers, cookies and derived fields
//!
//! - **Response** ([`response`]): the response header, frozen once sent
//!   - [`Response`]: status, content length, connection mode, headers and cookies
//!   - [`ConnectionMode`]: the `connection` header value
//!   - [`negotiate_keep_alive`]: the keep-alive decision
//!
//! - **Fields** ([`fields`]): case-insensitive maps with default-aware lookups
//!   - [`FieldMap`]
//!
//! - **Error Handling** ([`error`]):
//!   - [`HttpError`]: top-level error type carrying status code and keep-open flag
//!   - [`ParseError`]: request side errors
//!   - [`SendError`]: response side errors
//!   - [`WebSocketError`]: handshake and framing errors

mod fields;
pub use fields::FieldMap;

mod request;
pub use request::Request;

mod response;
pub use response::ConnectionMode;
pub use response::Response;
pub use response::negotiate_keep_alive;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
pub use error::WebSocketError;
