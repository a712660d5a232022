//! The per-connection byte stream with its reader and writer windows.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::{Transport, Window};
use crate::ensure;
use crate::protocol::{HttpError, ParseError, SendError};

/// Initial capacity of the read-ahead buffer
const INIT_READ_BUFFER: usize = 8 * 1024;

/// Bodies up to this size are written together with a pending header in one write.
const COALESCE_LIMIT: usize = 16 * 1024;

/// A transport wrapped with one reader window and one writer window.
///
/// The windows live as long as the connection and are reset for every request. Reads go
/// through a read-ahead buffer shared with the header and frame decoders, so bytes that
/// arrive right behind a header stay available to the body reader.
///
/// The writer carries at most one pending header. Every write, and every flush, sends it
/// first, so header bytes always precede body bytes on the wire.
pub(crate) struct HttpStream {
    io: Box<dyn Transport>,
    read_buf: BytesMut,
    reader: Window,
    writer: Window,
    pending: Option<Bytes>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream")
            .field("buffered", &self.read_buf.len())
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("pending", &self.pending.as_ref().map(Bytes::len))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpStream {
    pub(crate) fn new<T: Transport>(io: T) -> Self {
        Self {
            io: Box::new(io),
            read_buf: BytesMut::with_capacity(INIT_READ_BUFFER),
            reader: Window::new(0),
            writer: Window::new(0),
            pending: None,
            timeout: None,
        }
    }

    pub(crate) fn reader(&self) -> &Window {
        &self.reader
    }

    pub(crate) fn writer(&self) -> &Window {
        &self.writer
    }

    pub(crate) fn reset_reader(&mut self, length: u64) {
        self.reader.reset(length);
    }

    pub(crate) fn reset_writer(&mut self, length: u64) {
        self.writer.reset(length);
    }

    /// Turns both windows unbounded; the connection is a raw duplex stream from now on.
    pub(crate) fn unbounded(&mut self) {
        self.reader.unbounded();
        self.writer.unbounded();
    }

    /// Bounds every following transport read and write; `None` waits forever.
    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub(crate) fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.io.set_nodelay(nodelay)
    }

    pub(crate) fn set_pending(&mut self, header: Bytes) {
        debug_assert!(self.pending.is_none(), "a header is already pending");
        self.pending = Some(header);
    }

    pub(crate) fn discard_pending(&mut self) {
        self.pending = None;
    }

    /// Decodes the next item from the read-ahead buffer, reading more bytes as needed.
    ///
    /// Returns `Ok(None)` if the peer closed the connection with nothing buffered. An EOF
    /// in the middle of an item is an [`ParseError::UnexpectedEof`].
    pub(crate) async fn decode<D>(&mut self, decoder: &mut D) -> Result<Option<D::Item>, HttpError>
    where
        D: Decoder,
        HttpError: From<D::Error>,
    {
        loop {
            if let Some(item) = decoder.decode(&mut self.read_buf)? {
                return Ok(Some(item));
            }

            self.read_buf.reserve(INIT_READ_BUFFER);
            let read = read_timeout(self.timeout, self.io.read_buf(&mut self.read_buf)).await?;
            if read == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ParseError::UnexpectedEof.into());
            }
            trace!(read, buffered = self.read_buf.len(), "filled read buffer");
        }
    }

    /// Reads at most `dst.len()` bytes of the current body, clamped to the reader window.
    ///
    /// Returns 0 only at the end of the window.
    pub(crate) async fn read(&mut self, dst: &mut [u8]) -> Result<usize, ParseError> {
        let max = self.reader.clamp(dst.len());
        if max == 0 {
            return Ok(0);
        }

        let count = if !self.read_buf.is_empty() {
            let count = max.min(self.read_buf.len());
            dst[..count].copy_from_slice(&self.read_buf[..count]);
            self.read_buf.advance(count);
            count
        } else {
            let count = read_timeout(self.timeout, self.io.read(&mut dst[..max])).await?;
            ensure!(count > 0, ParseError::UnexpectedEof);
            count
        };

        self.reader.advance(count as u64);
        Ok(count)
    }

    /// Fills `dst` completely, or fails.
    pub(crate) async fn read_exact(&mut self, dst: &mut [u8]) -> Result<(), ParseError> {
        let mut filled = 0;
        while filled < dst.len() {
            let count = self.read(&mut dst[filled..]).await?;
            ensure!(count > 0, ParseError::UnexpectedEof);
            filled += count;
        }
        Ok(())
    }

    /// Writes the whole of `src` into the writer window.
    ///
    /// A write that does not fit in the window fails with [`SendError::TooManyBytes`] and
    /// transmits nothing.
    pub(crate) async fn write(&mut self, src: &[u8]) -> Result<(), SendError> {
        let remaining = self.writer.remaining();
        ensure!(src.len() as u64 <= remaining, SendError::too_many_bytes(src.len() as u64, remaining));

        match self.pending.take() {
            Some(header) if src.len() <= COALESCE_LIMIT => {
                let mut buf = BytesMut::with_capacity(header.len() + src.len());
                buf.put_slice(&header);
                buf.put_slice(src);
                write_timeout(self.timeout, self.io.write_all(&buf)).await?;
            }
            Some(header) => {
                write_timeout(self.timeout, self.io.write_all(&header)).await?;
                write_timeout(self.timeout, self.io.write_all(src)).await?;
            }
            None if src.is_empty() => {}
            None => write_timeout(self.timeout, self.io.write_all(src)).await?,
        }

        self.writer.advance(src.len() as u64);
        Ok(())
    }

    /// Sends a pending header, if any, and flushes the transport.
    pub(crate) async fn flush(&mut self) -> Result<(), SendError> {
        if let Some(header) = self.pending.take() {
            write_timeout(self.timeout, self.io.write_all(&header)).await?;
        }
        write_timeout(self.timeout, self.io.flush()).await
    }

    pub(crate) async fn shutdown(&mut self) -> Result<(), SendError> {
        write_timeout(self.timeout, self.io.shutdown()).await
    }
}

async fn read_timeout<T, F>(timeout: Option<Duration>, future: F) -> Result<T, ParseError>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future).await.map_err(|_elapsed| ParseError::Timeout(duration))?.map_err(ParseError::io),
        None => future.await.map_err(ParseError::io),
    }
}

async fn write_timeout<T, F>(timeout: Option<Duration>, future: F) -> Result<T, SendError>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future).await.map_err(|_elapsed| SendError::Timeout(duration))?.map_err(SendError::io),
        None => future.await.map_err(SendError::io),
    }
}
