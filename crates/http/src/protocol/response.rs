//! HTTP response model.
//!
//! A [`Response`] is mutable until its header is sent. The first time the handler asks
//! for a body reader, a body writer or a WebSocket upgrade, the header is serialized and
//! the response is frozen: every mutator checks the `header_sent` flag and fails with
//! [`SendError::HeaderSent`] afterwards.

use http::StatusCode;

use crate::ensure;
use crate::protocol::{FieldMap, SendError};

/// The value of the `connection` header sent with a response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionMode {
    KeepAlive,
    Close,
    /// Used by the `101 Switching Protocols` response of a WebSocket handshake.
    Upgrade,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::KeepAlive => "keep-alive",
            ConnectionMode::Close => "close",
            ConnectionMode::Upgrade => "Upgrade",
        }
    }
}

/// An HTTP response header under construction.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    status_message: String,
    content_length: i64,
    connection: Option<ConnectionMode>,
    content_type: Option<String>,
    headers: FieldMap,
    cookies: FieldMap,
    header_sent: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            status_message: "OK".to_string(),
            content_length: -1,
            connection: None,
            content_type: None,
            headers: FieldMap::new(),
            cookies: FieldMap::new(),
            header_sent: false,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// The declared content length, `-1` until set.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    /// The connection mode, `None` until set by the handler or by keep-alive negotiation.
    pub fn connection(&self) -> Option<ConnectionMode> {
        self.connection
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn headers(&self) -> &FieldMap {
        &self.headers
    }

    pub fn cookies(&self) -> &FieldMap {
        &self.cookies
    }

    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    /// Returns true if the negotiated connection mode keeps the connection open.
    pub fn keep_alive(&self) -> bool {
        self.connection == Some(ConnectionMode::KeepAlive)
    }

    /// Sets the status code and resets the status message to its canonical reason.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), SendError> {
        self.ensure_mutable()?;
        self.status = status;
        self.status_message = status.canonical_reason().unwrap_or_default().to_string();
        Ok(())
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: S) -> Result<(), SendError> {
        self.ensure_mutable()?;
        self.status_message = message.into();
        Ok(())
    }

    pub fn set_content_length(&mut self, content_length: u64) -> Result<(), SendError> {
        self.ensure_mutable()?;
        self.content_length = i64::try_from(content_length).unwrap_or(i64::MAX);
        Ok(())
    }

    pub fn set_connection(&mut self, connection: ConnectionMode) -> Result<(), SendError> {
        self.ensure_mutable()?;
        self.connection = Some(connection);
        Ok(())
    }

    pub fn set_content_type<S: Into<String>>(&mut self, content_type: S) -> Result<(), SendError> {
        self.ensure_mutable()?;
        self.content_type = Some(content_type.into());
        Ok(())
    }

    pub fn set_mime(&mut self, mime: &mime::Mime) -> Result<(), SendError> {
        self.set_content_type(mime.as_ref())
    }

    pub fn set_header<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> Result<(), SendError> {
        self.ensure_mutable()?;
        self.headers.insert(key, value);
        Ok(())
    }

    pub fn set_cookie<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) -> Result<(), SendError> {
        self.ensure_mutable()?;
        self.cookies.insert(name, value);
        Ok(())
    }

    /// Marks the header as sent. There is no way back.
    pub(crate) fn freeze(&mut self) {
        self.header_sent = true;
    }

    fn ensure_mutable(&self) -> Result<(), SendError> {
        ensure!(!self.header_sent, SendError::HeaderSent);
        Ok(())
    }
}

/// Decides whether the connection stays open after the current exchange.
///
/// An explicit `close` on the response always wins. Otherwise the client decides: an
/// HTTP/1.0 client must ask for `keep-alive`, an HTTP/1.1 client keeps the connection
/// unless it sent `connection: close`.
pub fn negotiate_keep_alive(version_minor: u8, client_connection: &str, response_connection: Option<ConnectionMode>) -> bool {
    if response_connection == Some(ConnectionMode::Close) {
        return false;
    }

    let client_connection = client_connection.trim();
    client_connection.eq_ignore_ascii_case("keep-alive")
        || (version_minor >= 1 && !client_connection.eq_ignore_ascii_case("close"))
}
