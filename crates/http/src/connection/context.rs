//! The per-request context handed to the handler.

use std::io::ErrorKind;
use std::path::Path;

use bytes::BytesMut;
use http::StatusCode;
use tokio::io::AsyncReadExt;
use tokio_util::codec::Encoder;
use tracing::{debug, warn};

use crate::codec::HeaderEncoder;
use crate::connection::ConnectionConfig;
use crate::ensure;
use crate::protocol::{ConnectionMode, HttpError, Request, Response, SendError, WebSocketError, negotiate_keep_alive};
use crate::stream::{BodyReader, BodyWriter, HttpStream};
use crate::websocket::handshake::{accept_key, check_protocol};
use crate::websocket::{WebSocket, WebSocketState};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const FILE_CHUNK: usize = 16 * 1024;

/// One request/response exchange on a connection.
///
/// The response stays mutable until the header is sent, which happens the first time the
/// handler asks for a [`reader`](HttpContext::reader), a [`writer`](HttpContext::writer)
/// or a WebSocket upgrade. From then on the response is frozen and the body windows are
/// set to the declared content lengths.
#[derive(Debug)]
pub struct HttpContext<'conn> {
    request: Request,
    response: Response,
    stream: &'conn mut HttpStream,
    websocket: Option<WebSocketState>,
    config: &'conn ConnectionConfig,
}

impl<'conn> HttpContext<'conn> {
    pub(crate) fn new(request: Request, stream: &'conn mut HttpStream, config: &'conn ConnectionConfig) -> Self {
        Self { request, response: Response::new(), stream, websocket: None, config }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Returns the request body reader, sending the response header if not sent yet.
    ///
    /// The response header goes out with the content length set so far, or 0 if none was
    /// set: a handler answering with a body sets the response content length first.
    pub fn reader(&mut self) -> Result<BodyReader<'_>, HttpError> {
        if !self.response.header_sent() {
            if self.response.content_length() < 0 {
                self.response.set_content_length(0)?;
            }
            self.send_header()?;
        }
        Ok(BodyReader::new(&mut *self.stream))
    }

    /// Returns the response body writer, sending the response header if not sent yet.
    ///
    /// Fails if no response content length was set.
    pub fn writer(&mut self) -> Result<BodyWriter<'_>, HttpError> {
        if !self.response.header_sent() {
            ensure!(self.response.content_length() >= 0, SendError::MissingContentLength);
            self.send_header()?;
        }
        Ok(BodyWriter::new(&mut *self.stream))
    }

    /// Sends `body` as the whole response body.
    pub async fn send_response<B: AsRef<[u8]>>(&mut self, body: B) -> Result<(), HttpError> {
        let body = body.as_ref();
        self.response.set_content_length(body.len() as u64)?;
        let mut writer = self.writer()?;
        writer.write(body).await
    }

    /// Sends a plain text response with the given status.
    pub async fn send_status<S: AsRef<str>>(&mut self, status: StatusCode, text: S) -> Result<(), HttpError> {
        self.response.set_status(status)?;
        self.response.set_content_type(TEXT_PLAIN)?;
        self.send_response(text.as_ref()).await
    }

    /// Streams a file as the response body.
    ///
    /// The content type is guessed from the extension unless already set. A missing file
    /// is reported as a 404 that keeps the connection open.
    pub async fn send_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), HttpError> {
        let path = path.as_ref();
        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HttpError::status(StatusCode::NOT_FOUND, "file not found").with_keep_open());
            }
            Err(e) => return Err(SendError::io(e).into()),
        };

        let length = file.metadata().await.map_err(SendError::io)?.len();
        self.response.set_content_length(length)?;
        if self.response.content_type().is_none() {
            self.response.set_mime(&mime_for_path(path))?;
        }
        debug!(path = %path.display(), length, "sending file");

        let mut writer = self.writer()?;
        let mut chunk = vec![0u8; FILE_CHUNK];
        while writer.remaining() > 0 {
            let want = usize::try_from(writer.remaining()).map_or(chunk.len(), |remaining| remaining.min(chunk.len()));
            let count = file.read(&mut chunk[..want]).await.map_err(SendError::io)?;
            if count == 0 {
                // truncated while sending; the length check after the handler reports it
                break;
            }
            writer.write(&chunk[..count]).await?;
        }
        Ok(())
    }

    /// Upgrades the connection to a WebSocket session.
    ///
    /// `protocol` is the sub-protocol the handler speaks: `None` accepts only clients that
    /// requested no sub-protocol, `Some(p)` requires `p` among the client's offers. The
    /// `101 Switching Protocols` response is flushed before this returns.
    pub async fn accept_websocket(&mut self, protocol: Option<&str>) -> Result<WebSocket<'_>, HttpError> {
        ensure!(self.request.is_websocket_request(), WebSocketError::NotUpgradeRequest);
        ensure!(!self.response.header_sent(), SendError::HeaderSent);
        check_protocol(self.request.header("sec-websocket-protocol"), protocol)?;

        let accept = accept_key(self.request.header("sec-websocket-key"));
        self.response.set_status(StatusCode::SWITCHING_PROTOCOLS)?;
        self.response.set_connection(ConnectionMode::Upgrade)?;
        self.response.set_header("upgrade", "websocket")?;
        self.response.set_header("sec-websocket-accept", accept)?;
        if let Some(protocol) = protocol {
            self.response.set_header("sec-websocket-protocol", protocol)?;
        }

        self.send_header()?;
        self.stream.flush().await?;
        self.stream.unbounded();
        if let Err(e) = self.stream.set_nodelay(true) {
            warn!(cause = %e, "failed to disable send coalescing on websocket connection");
        }

        debug!(path = self.request.path(), ?protocol, "accepted websocket");
        let state = self.websocket.insert(WebSocketState::new(protocol.map(str::to_string), self.config.max_message_size));
        Ok(WebSocket::new(&mut *self.stream, state))
    }

    /// The session of an accepted WebSocket, if any.
    pub fn websocket(&mut self) -> Option<WebSocket<'_>> {
        let state = self.websocket.as_mut()?;
        Some(WebSocket::new(&mut *self.stream, state))
    }

    pub fn is_websocket(&self) -> bool {
        self.websocket.is_some()
    }

    /// Closes an accepted session unless a close frame was already sent.
    pub(crate) async fn close_websocket(&mut self, status: u16) -> Result<(), HttpError> {
        match self.websocket.as_mut() {
            Some(state) if state.can_close() => WebSocket::new(&mut *self.stream, state).close(status, "").await,
            _ => Ok(()),
        }
    }

    /// Drops a queued header no body will follow.
    pub(crate) fn discard_pending(&mut self) {
        self.stream.discard_pending();
    }

    /// Replaces the response with an error response and sends it.
    ///
    /// Only possible while the header has not been sent. The connection stays open only
    /// if `keep_open` is set and no request body was left unread.
    pub(crate) async fn send_error(&mut self, status: StatusCode, message: &str, keep_open: bool) -> Result<(), HttpError> {
        ensure!(!self.response.header_sent(), SendError::HeaderSent);

        self.response = Response::new();
        if !keep_open || self.request.content_length() > 0 {
            self.response.set_connection(ConnectionMode::Close)?;
        }
        self.send_status(status, message).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Completes the exchange after the handler returned successfully.
    ///
    /// Flushes the pending output, then checks that a response was sent and that both
    /// bodies were transferred exactly. Returns whether the connection stays open.
    pub(crate) async fn finish(&mut self) -> Result<bool, HttpError> {
        if self.websocket.is_some() {
            self.stream.flush().await?;
            return Ok(false);
        }

        ensure!(self.response.header_sent(), SendError::NoResponse);
        self.stream.flush().await?;

        let reader = self.stream.reader();
        if self.request.content_length() >= 0 {
            ensure!(
                reader.position() == reader.length(),
                SendError::IncompleteRead { read: reader.position(), expected: reader.length() }
            );
        }

        let writer = self.stream.writer();
        ensure!(
            writer.position() == writer.length(),
            SendError::IncompleteWrite { written: writer.position(), expected: writer.length() }
        );

        Ok(self.response.keep_alive())
    }

    /// Freezes the response and queues its header ahead of the body.
    fn send_header(&mut self) -> Result<(), SendError> {
        ensure!(!self.response.header_sent(), SendError::HeaderSent);

        if self.response.connection() != Some(ConnectionMode::Upgrade) {
            let keep_alive = negotiate_keep_alive(
                self.request.version_minor(),
                self.request.header("connection"),
                self.response.connection(),
            );
            let mode = if keep_alive { ConnectionMode::KeepAlive } else { ConnectionMode::Close };
            self.response.set_connection(mode)?;
        }

        self.response.freeze();
        let mut header = BytesMut::new();
        HeaderEncoder.encode(&self.response, &mut header)?;
        self.stream.set_pending(header.freeze());

        self.stream.reset_reader(self.request.content_length().max(0) as u64);
        self.stream.reset_writer(self.response.content_length().max(0) as u64);
        Ok(())
    }
}

/// Guesses a content type from a file extension.
fn mime_for_path(path: &Path) -> mime::Mime {
    let extension = path.extension().and_then(|extension| extension.to_str()).unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "html" | "htm" => mime::TEXT_HTML_UTF_8,
        "css" => mime::TEXT_CSS_UTF_8,
        "js" | "mjs" => mime::TEXT_JAVASCRIPT,
        "json" => mime::APPLICATION_JSON,
        "txt" | "log" => mime::TEXT_PLAIN_UTF_8,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "svg" => mime::IMAGE_SVG,
        "pdf" => mime::APPLICATION_PDF,
        "woff" => mime::FONT_WOFF,
        "woff2" => mime::FONT_WOFF2,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
