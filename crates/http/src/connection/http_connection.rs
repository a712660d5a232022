use std::error::Error;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use http::StatusCode;
use tokio::select;
use tokio::time::timeout;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{HeaderDecoder, HeaderEncoder};
use crate::connection::{ConnectionConfig, HttpContext};
use crate::diagnostics::DiagnosticsLog;
use crate::handler::{Handler, HandlerError};
use crate::protocol::{ConnectionMode, HttpError, ParseError, Response, SendError, WebSocketError};
use crate::stream::{HttpStream, Transport};
use crate::websocket::CloseStatus;

/// The body sent with every 5xx error response; details stay in the logs.
const SERVER_ERROR_BODY: &str = "Server error";

/// An HTTP connection driving the persistent request loop.
///
/// `HttpConnection` owns the transport and serves one request at a time:
/// - reads and parses the request header
/// - invokes the handler with an [`HttpContext`]
/// - answers handler failures with an error response when one can still be sent
/// - checks the content-length accounting of every exchange
/// - keeps the connection open while keep-alive was negotiated
///
/// A WebSocket upgrade ends the loop once the handler returns.
#[derive(Debug)]
pub struct HttpConnection {
    stream: HttpStream,
    config: Arc<ConnectionConfig>,
    diagnostics: Arc<DiagnosticsLog>,
    shutdown: CancellationToken,
}

impl HttpConnection {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self {
            stream: HttpStream::new(transport),
            config: Arc::new(ConnectionConfig::default()),
            diagnostics: Arc::new(DiagnosticsLog::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: Arc<ConnectionConfig>) -> Self {
        self.config = config;
        self
    }

    /// Shares the diagnostics log failures are appended to.
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticsLog>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Closes the connection as soon as it waits for the next request once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Serves requests until the peer closes the connection, keep-alive ends or a failure
    /// terminates the connection.
    ///
    /// Returns the error that terminated the connection, if any. It has already been logged
    /// and appended to the diagnostics log.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        let result = self.serve(handler.as_ref()).await;
        if let Err(e) = self.stream.shutdown().await {
            debug!(cause = %e, "failed to shutdown connection");
        }
        result
    }

    async fn serve<H>(&mut self, handler: &H) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        let mut decoder = HeaderDecoder::new(self.config.max_header_size);

        loop {
            self.stream.reset_reader(self.config.max_header_size as u64);
            self.stream.reset_writer(0);
            // the header timeout bounds the whole header, not each read
            let header_timeout = self.config.header_timeout;
            self.stream.set_timeout(None);

            let next = select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("server shutting down, closing idle connection");
                    return Ok(());
                }
                next = timeout(header_timeout, self.stream.decode(&mut decoder)) => {
                    next.unwrap_or_else(|_elapsed| Err(ParseError::Timeout(header_timeout).into()))
                }
            };

            let request = match next {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("peer closed connection");
                    return Ok(());
                }
                Err(e) => {
                    self.reject_request(&e).await;
                    return Err(e);
                }
            };

            debug!(method = %request.method(), path = request.path(), "receive request");
            let websocket_request = request.is_websocket_request();
            self.stream.set_timeout(Some(self.config.body_timeout));

            let mut ctx = HttpContext::new(request, &mut self.stream, &self.config);
            let persistent = match handler.call(&mut ctx).await {
                Ok(()) => complete(&mut ctx, &self.diagnostics).await?,
                Err(e) => recover(&mut ctx, &self.diagnostics, e).await,
            };

            if websocket_request || !persistent {
                return Ok(());
            }
        }
    }

    /// Answers a request whose header could not be parsed, then gives up the connection.
    async fn reject_request(&mut self, error: &HttpError) {
        if error.is_fatal() {
            debug!(cause = %error, "connection failed while waiting for a request");
            return;
        }

        warn!(cause = %error, "can't parse request, closing connection");
        self.diagnostics.append(format!("bad request: {error}"));

        let status = error.status_code();
        let message = if status.is_client_error() { error.message() } else { SERVER_ERROR_BODY.to_string() };
        if let Err(e) = self.write_error_response(status, &message).await {
            error!(cause = %e, "failed to send error response");
            self.diagnostics.append(format!("failed to report bad request: {e}"));
        }
    }

    async fn write_error_response(&mut self, status: StatusCode, message: &str) -> Result<(), HttpError> {
        let mut response = Response::new();
        response.set_status(status)?;
        response.set_content_type("text/plain; charset=utf-8")?;
        response.set_content_length(message.len() as u64)?;
        response.set_connection(ConnectionMode::Close)?;
        response.freeze();

        let mut buf = BytesMut::new();
        HeaderEncoder.encode(&response, &mut buf)?;
        buf.put_slice(message.as_bytes());

        self.stream.reset_writer(buf.len() as u64);
        self.stream.write(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Finishes an exchange whose handler returned successfully.
async fn complete(ctx: &mut HttpContext<'_>, diagnostics: &DiagnosticsLog) -> Result<bool, HttpError> {
    if ctx.is_websocket() {
        if let Err(e) = ctx.close_websocket(CloseStatus::NORMAL).await {
            debug!(cause = %e, "failed to close websocket session");
        }
    }

    ctx.finish().await.inspect_err(|e| {
        error!(path = ctx.request().path(), cause = %e, "request handling broke the connection");
        diagnostics.append(format!("{} {}: {e}", ctx.request().method(), ctx.request().path()));
    })
}

/// Reports a handler failure to the client if still possible.
///
/// Returns whether the connection stays open.
async fn recover(ctx: &mut HttpContext<'_>, diagnostics: &DiagnosticsLog, error: HandlerError) -> bool {
    let failure = Failure::classify(error.as_ref());
    let method = ctx.request().method().clone();
    let path = ctx.request().path().to_string();

    if failure.status.is_server_error() {
        error!(%method, %path, status = failure.status.as_u16(), cause = %error, "request handler failed");
    } else {
        warn!(%method, %path, status = failure.status.as_u16(), cause = %error, "request rejected");
    }
    diagnostics.append(format!("{method} {path}: {} {error}", failure.status.as_u16()));

    if ctx.is_websocket() {
        if let Err(e) = ctx.close_websocket(failure.close_status).await {
            error!(cause = %e, "failed to close websocket session after failure");
            diagnostics.append(format!("{method} {path}: failed to close websocket: {e}"));
        }
        return false;
    }

    if failure.fatal || ctx.response().header_sent() {
        ctx.discard_pending();
        return false;
    }

    let message = if failure.status.is_client_error() { failure.message.as_str() } else { SERVER_ERROR_BODY };
    match ctx.send_error(failure.status, message, failure.keep_open).await {
        Ok(()) => ctx.response().keep_alive(),
        Err(e) => {
            error!(cause = %e, "failed to send error response, dropping connection");
            diagnostics.append(format!("{method} {path}: failed to report failure: {e}"));
            false
        }
    }
}

/// What the connection needs to know about a handler failure.
#[derive(Debug)]
struct Failure {
    status: StatusCode,
    message: String,
    keep_open: bool,
    fatal: bool,
    close_status: u16,
}

impl Failure {
    /// Walks the `source()` chain to the first typed server error; anything else is a 500.
    fn classify(error: &(dyn Error + Send + Sync + 'static)) -> Self {
        let mut current: Option<&(dyn Error + 'static)> = Some(error);
        while let Some(cause) = current {
            if let Some(e) = cause.downcast_ref::<HttpError>() {
                return Self::from_http_error(e);
            }
            if let Some(e) = cause.downcast_ref::<ParseError>() {
                return Self::from_parts(e.status(), e.to_string(), e.is_fatal(), CloseStatus::INTERNAL_ERROR);
            }
            if let Some(e) = cause.downcast_ref::<SendError>() {
                return Self::from_parts(e.status(), e.to_string(), e.is_fatal(), CloseStatus::INTERNAL_ERROR);
            }
            if let Some(e) = cause.downcast_ref::<WebSocketError>() {
                return Self::from_parts(e.status(), e.to_string(), e.is_fatal(), e.close_status());
            }
            current = cause.source();
        }

        Self::from_parts(StatusCode::INTERNAL_SERVER_ERROR, error.to_string(), false, CloseStatus::INTERNAL_ERROR)
    }

    fn from_http_error(error: &HttpError) -> Self {
        Self {
            status: error.status_code(),
            message: error.message(),
            keep_open: error.keep_open(),
            fatal: error.is_fatal(),
            close_status: error.close_status(),
        }
    }

    fn from_parts(status: StatusCode, message: String, fatal: bool, close_status: u16) -> Self {
        Self { status, message, keep_open: false, fatal, close_status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameEncoder, FrameHeader, OpCode, apply_mask};
    use crate::handler::{NoHandler, make_handler};
    use crate::websocket::MessageType;
    use futures::FutureExt;
    use indoc::indoc;
    use std::fmt;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::task::JoinHandle;

    fn spawn_connection<H: Handler + 'static>(handler: H) -> (DuplexStream, Arc<DiagnosticsLog>, JoinHandle<Result<(), HttpError>>) {
        let (client, server) = duplex(64 * 1024);
        let diagnostics = Arc::new(DiagnosticsLog::new());
        let connection = HttpConnection::new(server).with_diagnostics(Arc::clone(&diagnostics));
        let task = tokio::spawn(connection.process(Arc::new(handler)));
        (client, diagnostics, task)
    }

    async fn read_to_bytes(client: &mut DuplexStream) -> Vec<u8> {
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        received
    }

    async fn read_to_string(client: &mut DuplexStream) -> String {
        String::from_utf8(read_to_bytes(client).await).unwrap()
    }

    fn masked_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let mask = [0xde, 0xad, 0xbe, 0xef];
        let mut frame = BytesMut::new();
        FrameEncoder.encode(FrameHeader::new(fin, opcode, payload.len() as u64).with_mask(mask), &mut frame).unwrap();
        let mut masked = payload.to_vec();
        apply_mask(&mut masked, mask, 0);
        frame.put_slice(&masked);
        frame.to_vec()
    }

    #[tokio::test]
    async fn keep_alive_serves_second_request() {
        let handler = make_handler(|ctx| {
            async move {
                ctx.send_response("hi").await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, _diagnostics, task) = spawn_connection(handler);

        let request = "GET /x HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\n\r\n";
        let expected = "HTTP/1.1 200 OK\r\ncontent-length:2\r\nconnection:keep-alive\r\n\r\nhi";

        client.write_all(request.as_bytes()).await.unwrap();
        let mut first = vec![0u8; expected.len()];
        client.read_exact(&mut first).await.unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), expected);

        client.write_all(request.as_bytes()).await.unwrap();
        let mut second = vec![0u8; expected.len()];
        client.read_exact(&mut second).await.unwrap();
        assert_eq!(String::from_utf8(second).unwrap(), expected);

        client.shutdown().await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn http_1_0_closes_by_default() {
        let handler = make_handler(|ctx| {
            async move {
                ctx.send_response("bye").await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, _diagnostics, task) = spawn_connection(handler);

        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        let response = read_to_string(&mut client).await;
        assert_eq!(response, "HTTP/1.1 200 OK\r\ncontent-length:3\r\nconnection:close\r\n\r\nbye");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn echo_request_body() {
        let handler = make_handler(|ctx| {
            async move {
                let length = ctx.request().content_length().max(0) as u64;
                ctx.response_mut().set_content_length(length)?;
                let mut body = Vec::new();
                ctx.reader()?.read_to_end(&mut body).await?;
                ctx.writer()?.write(&body).await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, _diagnostics, task) = spawn_connection(handler);

        let request = indoc! {"
            POST /echo HTTP/1.1
            Content-Length: 5
            Connection: close

            hello"};
        client.write_all(request.replace('\n', "\r\n").as_bytes()).await.unwrap();

        let response = read_to_string(&mut client).await;
        assert_eq!(response, "HTTP/1.1 200 OK\r\ncontent-length:5\r\nconnection:close\r\n\r\nhello");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn no_response_breaks_connection() {
        let handler = make_handler(|_ctx| async move { Ok::<(), HandlerError>(()) }.boxed());
        let (mut client, diagnostics, task) = spawn_connection(handler);

        client.write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();
        assert_eq!(read_to_string(&mut client).await, "");

        let result = task.await.unwrap();
        assert!(matches!(result, Err(HttpError::ResponseError { source: SendError::NoResponse })));
        assert!(diagnostics.dump().contains("did not send a response"));
    }

    #[tokio::test]
    async fn short_body_breaks_connection() {
        let handler = make_handler(|ctx| {
            async move {
                ctx.response_mut().set_content_length(10)?;
                ctx.writer()?.write(b"short").await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, _diagnostics, task) = spawn_connection(handler);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let response = read_to_string(&mut client).await;
        assert!(response.ends_with("\r\n\r\nshort"));

        let result = task.await.unwrap();
        assert!(matches!(result, Err(HttpError::ResponseError { source: SendError::IncompleteWrite { .. } })));
    }

    #[tokio::test]
    async fn too_many_bytes_is_server_error() {
        let handler = make_handler(|ctx| {
            async move {
                ctx.response_mut().set_content_length(2)?;
                ctx.response_mut().set_connection(ConnectionMode::Close)?;
                ctx.writer()?.write(b"too long").await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, diagnostics, task) = spawn_connection(handler);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(read_to_string(&mut client).await, "");
        assert!(task.await.unwrap().is_ok());
        assert!(diagnostics.dump().contains("500"));
    }

    #[tokio::test]
    async fn bad_request_line_gets_400() {
        let (mut client, _diagnostics, task) = spawn_connection(NoHandler);

        client.write_all(b"BREW /pot HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();
        let response = read_to_string(&mut client).await;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("connection:close\r\n"));
        assert!(response.ends_with("invalid http method: BREW"));
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn no_handler_answers_503_and_keeps_alive() {
        let (mut client, _diagnostics, task) = spawn_connection(NoHandler);

        let expected = concat!(
            "HTTP/1.1 503 Service Unavailable\r\n",
            "content-length:12\r\n",
            "connection:keep-alive\r\n",
            "content-type:text/plain; charset=utf-8\r\n",
            "\r\n",
            "Server error"
        );
        for _ in 0..2 {
            client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
            let mut response = vec![0u8; expected.len()];
            client.read_exact(&mut response).await.unwrap();
            assert_eq!(String::from_utf8(response).unwrap(), expected);
        }

        client.shutdown().await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[derive(Debug)]
    struct Wrapped(HttpError);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "lookup failed")
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn classify_walks_source_chain() {
        let wrapped: HandlerError = Box::new(Wrapped(HttpError::status(StatusCode::NOT_FOUND, "missing")));
        let failure = Failure::classify(wrapped.as_ref());
        assert_eq!(failure.status, StatusCode::NOT_FOUND);
        assert_eq!(failure.message, "missing");

        let untyped: HandlerError = "boom".into();
        let failure = Failure::classify(untyped.as_ref());
        assert_eq!(failure.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!failure.fatal);

        let timeout: HandlerError = Box::new(HttpError::from(ParseError::Timeout(Duration::from_secs(1))));
        assert!(Failure::classify(timeout.as_ref()).fatal);
    }

    #[tokio::test]
    async fn websocket_echo_and_close() {
        let handler = make_handler(|ctx| {
            async move {
                let mut ws = ctx.accept_websocket(Some("screen")).await?;
                let mut message = Vec::new();
                let result = ws.receive_message(&mut message).await?;
                assert_eq!(result.message_type, MessageType::Text);
                ws.send(&message, MessageType::Text, true).await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, _diagnostics, task) = spawn_connection(handler);

        let handshake = indoc! {"
            GET /ws HTTP/1.1
            Host: h
            Upgrade: websocket
            Connection: Upgrade
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
            Sec-WebSocket-Version: 13
            Sec-WebSocket-Protocol: chat, screen

            "};
        client.write_all(handshake.replace('\n', "\r\n").as_bytes()).await.unwrap();
        client.write_all(&masked_frame(false, OpCode::Text, b"hello ")).await.unwrap();
        client.write_all(&masked_frame(true, OpCode::Continuation, b"mirror")).await.unwrap();

        let expected_handshake = concat!(
            "HTTP/1.1 101 Switching Protocols\r\n",
            "connection:Upgrade\r\n",
            "upgrade:websocket\r\n",
            "sec-websocket-accept:s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n",
            "sec-websocket-protocol:screen\r\n",
            "\r\n"
        );
        let mut received = read_to_bytes(&mut client).await;
        assert!(received.starts_with(expected_handshake.as_bytes()));

        let frames = received.split_off(expected_handshake.len());
        let mut echo = vec![0x81, 12];
        echo.extend_from_slice(b"hello mirror");
        assert_eq!(&frames[..14], &echo[..]);
        assert_eq!(&frames[14..], &[0x88, 0x02, 0x03, 0xe8]);

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn websocket_protocol_violation_closes_with_1002() {
        let handler = make_handler(|ctx| {
            async move {
                let mut ws = ctx.accept_websocket(None).await?;
                let mut buf = [0u8; 16];
                ws.receive(&mut buf).await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, diagnostics, task) = spawn_connection(handler);

        let handshake = "GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: a2V5\r\nSec-WebSocket-Version: 13\r\n\r\n";
        client.write_all(handshake.as_bytes()).await.unwrap();
        // unmasked client frame
        client.write_all(&[0x81, 0x01, b'x']).await.unwrap();

        let received = read_to_bytes(&mut client).await;
        assert!(received.ends_with(&[0x88, 0x02, 0x03, 0xea]));
        assert!(task.await.unwrap().is_ok());
        assert!(!diagnostics.is_empty());
    }

    #[tokio::test]
    async fn websocket_protocol_mismatch_is_400() {
        let handler = make_handler(|ctx| {
            async move {
                ctx.accept_websocket(Some("chat")).await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let (mut client, _diagnostics, task) = spawn_connection(handler);

        let handshake = "GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: a2V5\r\nSec-WebSocket-Version: 13\r\n\r\n";
        client.write_all(handshake.as_bytes()).await.unwrap();

        let response = read_to_string(&mut client).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("connection:close\r\n"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connection() {
        let (mut client, server) = duplex(1024);
        let shutdown = CancellationToken::new();
        let connection = HttpConnection::new(server).with_shutdown(shutdown.clone());
        let task = tokio::spawn(connection.process(Arc::new(NoHandler)));

        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(read_to_string(&mut client).await, "");
    }

    #[tokio::test]
    async fn slow_header_times_out() {
        let (mut client, server) = duplex(1024);
        let config = ConnectionConfig { header_timeout: Duration::from_millis(300), ..ConnectionConfig::default() };
        let handler = make_handler(|ctx| {
            async move {
                ctx.send_response("hi").await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        });
        let task = tokio::spawn(HttpConnection::new(server).with_config(Arc::new(config)).process(Arc::new(handler)));

        let started = Instant::now();
        let trickle = tokio::spawn(async move {
            for byte in b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n" {
                if client.write_all(&[*byte]).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            client
        });

        let result = task.await.unwrap();
        assert!(matches!(result, Err(HttpError::RequestError { source: ParseError::Timeout(_) })));
        assert!(started.elapsed() < Duration::from_secs(2));

        let mut client = trickle.await.unwrap();
        assert_eq!(read_to_string(&mut client).await, "");
    }

    #[tokio::test]
    async fn failed_error_response_drops_connection() {
        let handler = make_handler(|_ctx| {
            async move { Err::<(), HandlerError>(HttpError::status(StatusCode::BAD_REQUEST, "nope").into()) }.boxed()
        });
        let (mut client, diagnostics, task) = spawn_connection(handler);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        drop(client);

        assert!(task.await.unwrap().is_ok());
        assert!(diagnostics.dump().contains("failed to report failure"));
    }

    #[tokio::test]
    async fn failed_bad_request_response_is_logged() {
        let (mut client, diagnostics, task) = spawn_connection(NoHandler);

        client.write_all(b"BREW /pot HTTP/1.1\r\n\r\n").await.unwrap();
        drop(client);

        assert!(task.await.unwrap().is_err());
        assert!(diagnostics.dump().contains("failed to report bad request"));
    }
}
