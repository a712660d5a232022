//! The WebSocket frame state machine.
//!
//! A session is created by [`HttpContext::accept_websocket`](crate::connection::HttpContext::accept_websocket)
//! and lives in the connection context until the connection is torn down. Frames are
//! read straight from the connection stream: the header through [`FrameDecoder`], the
//! payload directly into the caller's buffer, unmasked in place.
//!
//! ```text
//!            receive close                 send close
//!   Open ------------------> CloseReceived ----------> Closed
//!     |                                                  ^
//!     | send close                        receive close  |
//!     +-----------------> CloseSent ---------------------+
//! ```

use std::mem;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::{debug, trace};

use crate::codec::frame::MAX_CONTROL_PAYLOAD;
use crate::codec::{FrameDecoder, FrameEncoder, FrameHeader, OpCode, apply_mask};
use crate::ensure;
use crate::protocol::{HttpError, ParseError, WebSocketError};
use crate::stream::HttpStream;

/// Default upper bound of a message assembled by [`WebSocket::receive_message`].
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Longest close description that still fits a control frame next to the status code.
const MAX_CLOSE_DESCRIPTION: usize = 123;

/// Close status codes (RFC 6455 section 7.4.1).
#[derive(Debug, Clone, Copy)]
pub struct CloseStatus;

impl CloseStatus {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Open,
    CloseSent,
    CloseReceived,
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

/// The outcome of one [`WebSocket::receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveResult {
    pub message_type: MessageType,
    /// Bytes written into the caller's buffer.
    pub count: usize,
    /// True once the final frame of a message has been fully delivered.
    pub end_of_message: bool,
    /// Set on close results; `None` if the close frame carried no status.
    pub close_status: Option<u16>,
    pub close_description: Option<String>,
}

impl ReceiveResult {
    fn data(message_type: MessageType, count: usize, end_of_message: bool) -> Self {
        Self { message_type, count, end_of_message, close_status: None, close_description: None }
    }
}

/// The payload cursor of the frame currently being delivered.
#[derive(Debug, Clone, Copy)]
struct FrameCursor {
    message_type: MessageType,
    fin: bool,
    remaining: u64,
    mask: [u8; 4],
    mask_pos: u64,
}

/// Session state kept by the connection across handler calls into the session.
#[derive(Debug)]
pub(crate) struct WebSocketState {
    session: SessionState,
    frame: Option<FrameCursor>,
    control: Option<FrameCursor>,
    control_payload: Vec<u8>,
    receiving: Option<MessageType>,
    last_was_close: bool,
    sending_in_progress: bool,
    ping_received: bool,
    pong_received: bool,
    ping_payload: Vec<u8>,
    close_status: Option<u16>,
    close_description: Option<String>,
    protocol: Option<String>,
    max_message_size: usize,
}

impl WebSocketState {
    pub(crate) fn new(protocol: Option<String>, max_message_size: usize) -> Self {
        Self {
            session: SessionState::Open,
            frame: None,
            control: None,
            control_payload: Vec::new(),
            receiving: None,
            last_was_close: false,
            sending_in_progress: false,
            ping_received: false,
            pong_received: false,
            ping_payload: Vec::new(),
            close_status: None,
            close_description: None,
            protocol,
            max_message_size,
        }
    }

    /// True if this side may still send a close frame.
    pub(crate) fn can_close(&self) -> bool {
        matches!(self.session, SessionState::Open | SessionState::CloseReceived)
    }
}

/// A WebSocket session over an upgraded connection.
///
/// Borrowed from the connection context; the handler drives it until it returns. A
/// session the handler leaves open is closed with status 1000 by the connection.
#[derive(Debug)]
pub struct WebSocket<'conn> {
    stream: &'conn mut HttpStream,
    state: &'conn mut WebSocketState,
}

impl<'conn> WebSocket<'conn> {
    pub(crate) fn new(stream: &'conn mut HttpStream, state: &'conn mut WebSocketState) -> Self {
        Self { stream, state }
    }

    pub fn state(&self) -> SessionState {
        self.state.session
    }

    /// The sub-protocol agreed during the handshake.
    pub fn protocol(&self) -> Option<&str> {
        self.state.protocol.as_deref()
    }

    /// The status of the close frame received from the peer, if any.
    pub fn close_status(&self) -> Option<u16> {
        self.state.close_status
    }

    pub fn close_description(&self) -> Option<&str> {
        self.state.close_description.as_deref()
    }

    /// True if the last frame header read was a ping.
    pub fn ping_received(&self) -> bool {
        self.state.ping_received
    }

    /// True if the last frame header read was a pong.
    pub fn pong_received(&self) -> bool {
        self.state.pong_received
    }

    /// The payload of the last ping received.
    pub fn ping_payload(&self) -> &[u8] {
        &self.state.ping_payload
    }

    pub fn max_message_size(&self) -> usize {
        self.state.max_message_size
    }

    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.state.max_message_size = max_message_size;
    }

    /// Changes the timeout bounding each read and write; `None` disables it.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.stream.set_timeout(timeout);
    }

    /// Receives the next chunk of frame payload into `buf`.
    ///
    /// Data chunks report how many bytes were written and whether the message ended. A
    /// close frame is reported with its status and description. Pings and pongs are
    /// reported with a count of 0 and do not end the current message; the ping payload
    /// is available through [`ping_payload`](WebSocket::ping_payload).
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<ReceiveResult, HttpError> {
        ensure!(self.state.session != SessionState::Closed, WebSocketError::invalid_state("session is closed"));

        if self.state.control.is_some() {
            return self.receive_control().await;
        }

        let mut cursor = match self.state.frame {
            Some(cursor) => cursor,
            None => match self.next_frame().await? {
                Some(cursor) => cursor,
                None => return self.receive_control().await,
            },
        };

        let mut count = usize::try_from(cursor.remaining).map_or(buf.len(), |remaining| buf.len().min(remaining));
        if count > 0 {
            count = self.stream.read(&mut buf[..count]).await?;
            ensure!(count > 0, ParseError::UnexpectedEof);
            apply_mask(&mut buf[..count], cursor.mask, cursor.mask_pos);
            cursor.mask_pos += count as u64;
            cursor.remaining -= count as u64;
        }

        let end_of_message = cursor.remaining == 0 && cursor.fin;
        if cursor.remaining == 0 {
            self.state.frame = None;
            if cursor.fin {
                self.state.receiving = None;
            }
        } else {
            self.state.frame = Some(cursor);
        }

        trace!(count, end_of_message, "received websocket payload");
        Ok(ReceiveResult::data(cursor.message_type, count, end_of_message))
    }

    /// Receives a whole message into `out`.
    ///
    /// Fragments are appended in order, pings are answered with a pong carrying the same
    /// payload and pongs are skipped. A close frame ends the call and is returned as is.
    /// A message growing past the maximum message size is read to its end and discarded,
    /// then [`WebSocketError::MessageTooLong`] is raised.
    pub async fn receive_message(&mut self, out: &mut Vec<u8>) -> Result<ReceiveResult, HttpError> {
        let mut chunk = [0u8; 4096];
        let mut total = 0usize;
        let mut too_long = false;

        loop {
            let result = self.receive(&mut chunk).await?;
            match result.message_type {
                MessageType::Ping => {
                    let payload = mem::take(&mut self.state.ping_payload);
                    self.send_pong(&payload).await?;
                    self.state.ping_payload = payload;
                }
                MessageType::Pong => {}
                MessageType::Close => return Ok(result),
                MessageType::Text | MessageType::Binary => {
                    total += result.count;
                    if total > self.state.max_message_size {
                        too_long = true;
                    }
                    if !too_long {
                        out.extend_from_slice(&chunk[..result.count]);
                    }

                    if result.end_of_message {
                        ensure!(!too_long, WebSocketError::MessageTooLong { max_size: self.state.max_message_size });
                        return Ok(ReceiveResult::data(result.message_type, total, true));
                    }
                }
            }
        }
    }

    /// Sends `data` as one frame of a text or binary message, or as a close frame payload.
    ///
    /// A frame sent after an unfinished one continues the same message.
    pub async fn send(&mut self, data: &[u8], message_type: MessageType, end_of_message: bool) -> Result<(), HttpError> {
        match message_type {
            MessageType::Text | MessageType::Binary => {
                ensure!(
                    self.state.session == SessionState::Open || self.state.session == SessionState::CloseReceived,
                    WebSocketError::invalid_state("cannot send data after close was sent")
                );
                let opcode = match (self.state.sending_in_progress, message_type) {
                    (true, _) => OpCode::Continuation,
                    (false, MessageType::Text) => OpCode::Text,
                    (false, _) => OpCode::Binary,
                };
                self.state.sending_in_progress = !end_of_message;
                self.send_frame(FrameHeader::new(end_of_message, opcode, data.len() as u64), data).await
            }
            MessageType::Close => {
                ensure!(end_of_message, WebSocketError::invalid_state("close frames cannot be fragmented"));
                ensure!(
                    data.len() as u64 <= MAX_CONTROL_PAYLOAD && data.len() != 1,
                    WebSocketError::invalid_frame("close payload must be empty or 2 to 125 bytes")
                );
                self.begin_close()?;
                self.send_frame(FrameHeader::new(true, OpCode::Close, data.len() as u64), data).await
            }
            MessageType::Ping | MessageType::Pong => {
                Err(WebSocketError::invalid_state(format!("cannot send {message_type:?} through send")).into())
            }
        }
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), HttpError> {
        self.send(text.as_bytes(), MessageType::Text, true).await
    }

    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), HttpError> {
        self.send(data, MessageType::Binary, true).await
    }

    /// Sends a pong, typically echoing the payload of a received ping.
    pub async fn send_pong(&mut self, payload: &[u8]) -> Result<(), HttpError> {
        ensure!(self.state.can_close(), WebSocketError::invalid_state("cannot send pong after close was sent"));
        self.send_frame(FrameHeader::new(true, OpCode::Pong, payload.len() as u64), payload).await
    }

    /// Starts or completes the close handshake.
    ///
    /// Fails if a close frame was already sent. The description must fit in 123 bytes.
    pub async fn close(&mut self, status: u16, description: &str) -> Result<(), HttpError> {
        ensure!(
            description.len() <= MAX_CLOSE_DESCRIPTION,
            WebSocketError::invalid_frame(format!("close description exceeds {MAX_CLOSE_DESCRIPTION} bytes"))
        );
        self.begin_close()?;

        let mut payload = BytesMut::with_capacity(2 + description.len());
        payload.put_u16(status);
        payload.put_slice(description.as_bytes());

        debug!(status, description, "sending websocket close");
        self.send_frame(FrameHeader::new(true, OpCode::Close, payload.len() as u64), &payload).await
    }

    fn begin_close(&mut self) -> Result<(), WebSocketError> {
        self.state.session = match self.state.session {
            SessionState::Open => SessionState::CloseSent,
            SessionState::CloseReceived => SessionState::Closed,
            SessionState::CloseSent => return Err(WebSocketError::invalid_state("close already sent")),
            SessionState::Closed => return Err(WebSocketError::invalid_state("session is closed")),
        };
        Ok(())
    }

    async fn send_frame(&mut self, header: FrameHeader, payload: &[u8]) -> Result<(), HttpError> {
        ensure!(
            !header.opcode.is_control() || payload.len() as u64 <= MAX_CONTROL_PAYLOAD,
            WebSocketError::invalid_frame("control frame payload exceeds 125 bytes")
        );

        let mut frame = BytesMut::with_capacity(14 + payload.len());
        FrameEncoder.encode(header, &mut frame)?;
        frame.put_slice(payload);

        self.stream.write(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads and validates the next frame header.
    ///
    /// Returns the payload cursor of a data frame, or `None` for a control frame, which is
    /// left pending in `self.state.control` for [`receive_control`](Self::receive_control).
    async fn next_frame(&mut self) -> Result<Option<FrameCursor>, HttpError> {
        let header = self.stream.decode(&mut FrameDecoder).await?.ok_or(ParseError::UnexpectedEof)?;
        trace!(?header, "received websocket frame header");

        self.state.ping_received = false;
        self.state.pong_received = false;

        let mask = header.mask.unwrap_or_default();
        if header.opcode.is_control() {
            ensure!(header.fin, WebSocketError::invalid_frame("control frames cannot be fragmented"));
            ensure!(header.payload_len <= MAX_CONTROL_PAYLOAD, WebSocketError::invalid_frame("control frame payload exceeds 125 bytes"));
            ensure!(
                header.opcode != OpCode::Close || header.payload_len != 1,
                WebSocketError::invalid_frame("close frame payload of one byte")
            );

            let message_type = match header.opcode {
                OpCode::Close => MessageType::Close,
                OpCode::Ping => MessageType::Ping,
                _ => MessageType::Pong,
            };
            self.state.control =
                Some(FrameCursor { message_type, fin: true, remaining: header.payload_len, mask, mask_pos: 0 });
            self.state.control_payload.clear();
            return Ok(None);
        }

        let message_type = match (header.opcode, self.state.receiving) {
            (OpCode::Continuation, Some(message_type)) => message_type,
            (OpCode::Continuation, None) if self.state.last_was_close => {
                return Err(WebSocketError::invalid_frame("no data after close").into());
            }
            (OpCode::Continuation, None) => {
                return Err(WebSocketError::invalid_frame("continuation frame without a message in progress").into());
            }
            (_, Some(_)) => {
                return Err(WebSocketError::invalid_frame("new data frame inside a fragmented message").into());
            }
            (OpCode::Text, None) => MessageType::Text,
            (_, None) => MessageType::Binary,
        };
        ensure!(
            self.state.session != SessionState::CloseReceived,
            WebSocketError::invalid_frame("data frame after close")
        );

        self.state.receiving = Some(message_type);
        self.state.last_was_close = false;

        let cursor = FrameCursor { message_type, fin: header.fin, remaining: header.payload_len, mask, mask_pos: 0 };
        self.state.frame = Some(cursor);
        Ok(Some(cursor))
    }

    /// Reads a whole control frame payload and applies it to the session.
    ///
    /// Payload bytes are collected in the session state, so a call dropped part way resumes
    /// where it stopped.
    async fn receive_control(&mut self) -> Result<ReceiveResult, HttpError> {
        let Some(cursor) = self.state.control else {
            return Err(WebSocketError::invalid_state("no control frame pending").into());
        };

        let mut chunk = [0u8; MAX_CONTROL_PAYLOAD as usize];
        while (self.state.control_payload.len() as u64) < cursor.remaining {
            let want = cursor.remaining as usize - self.state.control_payload.len();
            let count = self.stream.read(&mut chunk[..want]).await?;
            ensure!(count > 0, ParseError::UnexpectedEof);
            self.state.control_payload.extend_from_slice(&chunk[..count]);
        }

        self.state.control = None;
        let mut payload = mem::take(&mut self.state.control_payload);
        apply_mask(&mut payload, cursor.mask, 0);

        match cursor.message_type {
            MessageType::Ping => {
                self.state.ping_received = true;
                self.state.ping_payload = payload;
                Ok(ReceiveResult::data(MessageType::Ping, 0, false))
            }
            MessageType::Pong => {
                self.state.pong_received = true;
                Ok(ReceiveResult::data(MessageType::Pong, 0, false))
            }
            _ => {
                let (status, description) = if payload.len() >= 2 {
                    let description = String::from_utf8(payload[2..].to_vec())
                        .map_err(|_invalid| WebSocketError::invalid_frame("close description is not valid utf-8"))?;
                    (Some(u16::from_be_bytes([payload[0], payload[1]])), Some(description))
                } else {
                    (None, None)
                };

                self.state.session = match self.state.session {
                    SessionState::CloseSent => SessionState::Closed,
                    _ => SessionState::CloseReceived,
                };
                self.state.last_was_close = true;
                self.state.close_status = status;
                self.state.close_description = description.clone();

                debug!(?status, ?description, state = ?self.state.session, "received websocket close");
                Ok(ReceiveResult {
                    message_type: MessageType::Close,
                    count: 0,
                    end_of_message: true,
                    close_status: status,
                    close_description: description,
                })
            }
        }
    }
}
