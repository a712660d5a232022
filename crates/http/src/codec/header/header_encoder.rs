//! HTTP header encoder implementation for serializing HTTP response headers
//!
//! The wire format is fixed: the status line, then `content-length`, `connection`,
//! `content-type` (when set), the caller supplied headers and the cookies as
//! `set-cookie` lines, in that order, each `key:value\r\n`, and a blank line.
//!
//! A response in [`ConnectionMode::Upgrade`] (the WebSocket handshake) carries no
//! `content-length`.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::{ConnectionMode, Response, SendError};

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 256;

/// Encoder for HTTP response headers implementing the [`Encoder`] trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl<'a> Encoder<&'a Response> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, response: &'a Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(INIT_HEADER_SIZE);
        let mut writer = FastWrite(dst);

        write!(writer, "HTTP/1.1 {} {}\r\n", response.status().as_str(), response.status_message())?;

        let connection = response.connection().unwrap_or(ConnectionMode::Close);
        if connection != ConnectionMode::Upgrade {
            write!(writer, "content-length:{}\r\n", response.content_length().max(0))?;
        }
        write!(writer, "connection:{}\r\n", connection.as_str())?;

        if let Some(content_type) = response.content_type() {
            write!(writer, "content-type:{content_type}\r\n")?;
        }

        for (key, value) in response.headers().iter() {
            write!(writer, "{key}:{value}\r\n")?;
        }

        for (name, value) in response.cookies().iter() {
            write!(writer, "set-cookie:{name}={value}\r\n")?;
        }

        writer.0.put_slice(b"\r\n");
        Ok(())
    }
}

/// Fast writer implementation for writing to BytesMut.
///
/// `BytesMut` grows on demand, so writes never fail.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn encode(response: &Response) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode(response, &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn minimal_keep_alive() {
        let mut response = Response::new();
        response.set_content_length(2).unwrap();
        response.set_connection(ConnectionMode::KeepAlive).unwrap();

        assert_eq!(encode(&response), "HTTP/1.1 200 OK\r\ncontent-length:2\r\nconnection:keep-alive\r\n\r\n");
    }

    #[test]
    fn full_header_order() {
        let mut response = Response::new();
        response.set_status(StatusCode::NOT_FOUND).unwrap();
        response.set_content_length(9).unwrap();
        response.set_connection(ConnectionMode::Close).unwrap();
        response.set_content_type("text/plain").unwrap();
        response.set_header("x-b", "2").unwrap();
        response.set_header("x-a", "1").unwrap();
        response.set_cookie("session", "abc").unwrap();

        let expected = concat!(
            "HTTP/1.1 404 Not Found\r\n",
            "content-length:9\r\n",
            "connection:close\r\n",
            "content-type:text/plain\r\n",
            "x-b:2\r\n",
            "x-a:1\r\n",
            "set-cookie:session=abc\r\n",
            "\r\n"
        );
        assert_eq!(encode(&response), expected);
    }

    #[test]
    fn upgrade_has_no_content_length() {
        let mut response = Response::new();
        response.set_status(StatusCode::SWITCHING_PROTOCOLS).unwrap();
        response.set_connection(ConnectionMode::Upgrade).unwrap();
        response.set_header("upgrade", "websocket").unwrap();

        assert_eq!(
            encode(&response),
            "HTTP/1.1 101 Switching Protocols\r\nconnection:Upgrade\r\nupgrade:websocket\r\n\r\n"
        );
    }
}
