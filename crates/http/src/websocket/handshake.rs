//! The server side of the opening handshake (RFC 6455 section 4.2).

use base64::prelude::*;
use sha1::{Digest, Sha1};

use crate::ensure;
use crate::protocol::WebSocketError;

const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `sec-websocket-accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Checks the sub-protocol the handler accepts against the client's offer.
///
/// `offered` is the raw `sec-websocket-protocol` request header, a comma separated list.
/// Accepting `None` requires the client to have offered nothing; accepting `Some(p)`
/// requires `p` to be one of the offers.
pub fn check_protocol(offered: &str, accepted: Option<&str>) -> Result<(), WebSocketError> {
    let mismatch = || WebSocketError::SubProtocolMismatch {
        requested: offered.to_string(),
        accepted: accepted.map(str::to_string),
    };

    match accepted {
        None => ensure!(offered.trim().is_empty(), mismatch()),
        Some(protocol) => ensure!(offered.split(',').any(|offer| offer.trim() == protocol), mismatch()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_sample_key() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn protocol_matching() {
        assert!(check_protocol("", None).is_ok());
        assert!(check_protocol("chat, screen", Some("screen")).is_ok());
        assert!(check_protocol("chat", Some("chat")).is_ok());

        assert!(matches!(check_protocol("chat", None), Err(WebSocketError::SubProtocolMismatch { .. })));
        assert!(matches!(check_protocol("", Some("chat")), Err(WebSocketError::SubProtocolMismatch { .. })));
        assert!(matches!(check_protocol("chatty", Some("chat")), Err(WebSocketError::SubProtocolMismatch { .. })));
    }
}
