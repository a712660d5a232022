//! Handler-facing body streams.

use crate::protocol::HttpError;

use super::HttpStream;

/// Reads the request body, never past the declared content length.
///
/// Obtained from [`HttpContext::reader`](crate::connection::HttpContext::reader). The
/// handler must consume exactly the declared number of bytes, otherwise the exchange is
/// judged broken once the handler returns.
#[derive(Debug)]
pub struct BodyReader<'conn> {
    stream: &'conn mut HttpStream,
}

impl<'conn> BodyReader<'conn> {
    pub(crate) fn new(stream: &'conn mut HttpStream) -> Self {
        Self { stream }
    }

    /// Reads into `buf`, returning 0 once the whole body has been read.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        Ok(self.stream.read(buf).await?)
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), HttpError> {
        Ok(self.stream.read_exact(buf).await?)
    }

    /// Reads the rest of the body into `out`, returning the number of bytes appended.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize, HttpError> {
        let start = out.len();
        let mut chunk = [0u8; 4096];
        loop {
            let count = self.stream.read(&mut chunk).await?;
            if count == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&chunk[..count]);
        }
    }

    pub fn position(&self) -> u64 {
        self.stream.reader().position()
    }

    pub fn length(&self) -> u64 {
        self.stream.reader().length()
    }

    pub fn remaining(&self) -> u64 {
        self.stream.reader().remaining()
    }
}

/// Writes the response body, never past the declared content length.
///
/// Obtained from [`HttpContext::writer`](crate::connection::HttpContext::writer). The
/// response header is transmitted ahead of the first body byte.
#[derive(Debug)]
pub struct BodyWriter<'conn> {
    stream: &'conn mut HttpStream,
}

impl<'conn> BodyWriter<'conn> {
    pub(crate) fn new(stream: &'conn mut HttpStream) -> Self {
        Self { stream }
    }

    /// Writes all of `buf`; fails without writing anything if it exceeds the remaining window.
    pub async fn write(&mut self, buf: &[u8]) -> Result<(), HttpError> {
        Ok(self.stream.write(buf).await?)
    }

    pub async fn flush(&mut self) -> Result<(), HttpError> {
        Ok(self.stream.flush().await?)
    }

    pub fn position(&self) -> u64 {
        self.stream.writer().position()
    }

    pub fn length(&self) -> u64 {
        self.stream.writer().length()
    }

    pub fn remaining(&self) -> u64 {
        self.stream.writer().remaining()
    }
}
