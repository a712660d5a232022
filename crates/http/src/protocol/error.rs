use std::io;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::websocket::CloseStatus;

/// Top-level error of the server core.
///
/// Every failure that crosses the handler boundary is an `HttpError`. The connection
/// supervisor inspects [`status`](HttpError::status), [`keep_open`](HttpError::keep_open)
/// and [`is_fatal`](HttpError::is_fatal) to decide whether an error response can be sent
/// and whether the connection survives it.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("websocket error: {source}")]
    WebSocketError {
        #[from]
        source: WebSocketError,
    },

    #[error("{status}: {message}")]
    Status { status: StatusCode, message: String, keep_open: bool },
}

impl HttpError {
    /// Creates an error carrying an explicit status code, e.g. a 404 raised by a handler.
    pub fn status<S: ToString>(status: StatusCode, message: S) -> Self {
        Self::Status { status, message: message.to_string(), keep_open: false }
    }

    /// Marks the error as recoverable: the connection stays open after the error response.
    ///
    /// Only errors created with [`HttpError::status`] carry the flag, the others are
    /// returned unchanged.
    #[must_use]
    pub fn with_keep_open(self) -> Self {
        match self {
            Self::Status { status, message, .. } => Self::Status { status, message, keep_open: true },
            other => other,
        }
    }

    /// The status code reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestError { source } => source.status(),
            Self::ResponseError { source } => source.status(),
            Self::WebSocketError { source } => source.status(),
            Self::Status { status, .. } => *status,
        }
    }

    pub fn keep_open(&self) -> bool {
        matches!(self, Self::Status { keep_open: true, .. })
    }

    /// Returns true for transport failures (timeouts, EOF, I/O); no response can be attempted.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::RequestError { source } => source.is_fatal(),
            Self::ResponseError { source } => source.is_fatal(),
            Self::WebSocketError { source } => source.is_fatal(),
            Self::Status { .. } => false,
        }
    }

    /// The message a client may see. Only meaningful for 4xx errors.
    pub fn message(&self) -> String {
        match self {
            Self::RequestError { source } => source.to_string(),
            Self::ResponseError { source } => source.to_string(),
            Self::WebSocketError { source } => source.to_string(),
            Self::Status { message, .. } => message.clone(),
        }
    }

    /// The close status used when this error ends a WebSocket session.
    pub fn close_status(&self) -> u16 {
        match self {
            Self::WebSocketError { source } => source.close_status(),
            _ => CloseStatus::INTERNAL_ERROR,
        }
    }
}

/// Errors raised while reading a request: header parsing and body reads.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: String },

    #[error("invalid http method: {method}")]
    InvalidMethod { method: String },

    #[error("invalid http version, only HTTP/1.x is supported")]
    InvalidVersion,

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("chunked transfer-encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("invalid websocket request: {reason}")]
    InvalidWebSocketRequest { reason: String },

    #[error("connection closed before the read completed")]
    UnexpectedEof,

    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_request_line<S: ToString>(str: S) -> Self {
        Self::InvalidRequestLine { reason: str.to_string() }
    }

    pub fn invalid_method<S: ToString>(str: S) -> Self {
        Self::InvalidMethod { method: str.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_websocket_request<S: ToString>(str: S) -> Self {
        Self::InvalidWebSocketRequest { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLargeHeader { .. } | Self::TooManyHeaders { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::UnexpectedEof | Self::Timeout(_) | Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnexpectedEof | Self::Timeout(_) | Self::Io { .. })
    }
}

/// Errors raised while producing a response, including violations of the
/// byte-accounting contract detected after the handler returns.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("response header has already been sent")]
    HeaderSent,

    #[error("content length must be set before writing the response body")]
    MissingContentLength,

    #[error("handler wrote too many bytes: {attempted} bytes exceed the {remaining} bytes left in the body")]
    TooManyBytes { attempted: u64, remaining: u64 },

    #[error("handler did not send a response")]
    NoResponse,

    #[error("request body not fully consumed: read {read} of {expected} bytes")]
    IncompleteRead { read: u64, expected: u64 },

    #[error("response body incomplete: wrote {written} of {expected} bytes")]
    IncompleteWrite { written: u64, expected: u64 },

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn too_many_bytes(attempted: u64, remaining: u64) -> Self {
        Self::TooManyBytes { attempted, remaining }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io { .. })
    }
}

/// Errors raised by the WebSocket handshake and frame state machine.
#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error("request is not a websocket upgrade request")]
    NotUpgradeRequest,

    #[error("sub-protocol mismatch: client requested {requested:?}, server accepts {accepted:?}")]
    SubProtocolMismatch { requested: String, accepted: Option<String> },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("frame too long")]
    FrameTooLong,

    #[error("message too long, exceed the limit {max_size}")]
    MessageTooLong { max_size: usize },

    #[error("invalid websocket state: {reason}")]
    InvalidState { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl WebSocketError {
    pub fn invalid_frame<S: ToString>(str: S) -> Self {
        Self::InvalidFrame { reason: str.to_string() }
    }

    pub fn invalid_state<S: ToString>(str: S) -> Self {
        Self::InvalidState { reason: str.to_string() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotUpgradeRequest | Self::SubProtocolMismatch { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub fn close_status(&self) -> u16 {
        match self {
            Self::InvalidFrame { .. } | Self::NotUpgradeRequest | Self::SubProtocolMismatch { .. } => {
                CloseStatus::PROTOCOL_ERROR
            }
            Self::FrameTooLong | Self::MessageTooLong { .. } => CloseStatus::MESSAGE_TOO_BIG,
            Self::InvalidState { .. } | Self::Io { .. } => CloseStatus::INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_request_errors() {
        let error = HttpError::from(ParseError::invalid_method("PATCH"));
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(!error.is_fatal());
        assert!(!error.keep_open());
        assert_eq!(error.message(), "invalid http method: PATCH");

        let error = HttpError::from(ParseError::Timeout(Duration::from_secs(10)));
        assert!(error.is_fatal());
    }

    #[test]
    fn keep_open_only_on_status_errors() {
        let error = HttpError::status(StatusCode::NOT_FOUND, "no such file").with_keep_open();
        assert!(error.keep_open());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(error.message(), "no such file");

        let error = HttpError::from(SendError::NoResponse).with_keep_open();
        assert!(!error.keep_open());
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn websocket_close_status() {
        assert_eq!(HttpError::from(WebSocketError::invalid_frame("rsv")).close_status(), CloseStatus::PROTOCOL_ERROR);
        assert_eq!(
            HttpError::from(WebSocketError::MessageTooLong { max_size: 10 }).close_status(),
            CloseStatus::MESSAGE_TOO_BIG
        );
        assert_eq!(HttpError::status(StatusCode::BAD_GATEWAY, "x").close_status(), CloseStatus::INTERNAL_ERROR);
    }
}
