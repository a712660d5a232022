//! HTTP request model.
//!
//! A [`Request`] is produced by the header decoder, one per request, and handed to the
//! handler read-only. Besides the raw request line and header fields it carries the fields
//! derived from them: query parameters, fragment, cookies, content length, host and the
//! WebSocket upgrade flag.

use http::Method;

use crate::ensure;
use crate::protocol::{FieldMap, ParseError};

/// The lowest `sec-websocket-version` the server speaks (RFC 6455).
const WEBSOCKET_VERSION: u32 = 13;

/// A parsed HTTP request header.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: FieldMap,
    fragment: String,
    headers: FieldMap,
    cookies: FieldMap,
    content_length: i64,
    host: String,
    version_minor: u8,
    websocket: bool,
}

impl Request {
    /// Builds a request from its request line and header fields.
    ///
    /// Header keys are expected to be lower-cased already. The derived fields are computed
    /// here, and a malformed WebSocket upgrade or a `transfer-encoding` header is rejected.
    pub(crate) fn from_parts(method: &str, target: &str, version_minor: u8, headers: FieldMap) -> Result<Self, ParseError> {
        let method = parse_method(method)?;
        let (path, query, fragment) = split_target(target);

        ensure!(!headers.contains_key("transfer-encoding"), ParseError::UnsupportedTransferEncoding);

        let content_length = parse_content_length(headers.get_or("content-length", ""));
        let host = headers.get_or("host", "").to_string();
        let cookies = parse_cookies(headers.get_or("cookie", ""));
        let websocket = is_websocket_upgrade(&headers)?;

        Ok(Self {
            method,
            path: path.to_string(),
            query: parse_query(query),
            fragment: fragment.to_string(),
            headers,
            cookies,
            content_length,
            host,
            version_minor,
            websocket,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target path, without query and fragment.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &FieldMap {
        &self.query
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn headers(&self) -> &FieldMap {
        &self.headers
    }

    /// Returns the header value, or an empty string if the header is absent.
    pub fn header(&self, key: &str) -> &str {
        self.headers.get_or(key, "")
    }

    pub fn cookies(&self) -> &FieldMap {
        &self.cookies
    }

    /// The declared content length, `-1` when absent or not a valid number.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The minor version of `HTTP/1.x`.
    pub fn version_minor(&self) -> u8 {
        self.version_minor
    }

    pub fn is_websocket_request(&self) -> bool {
        self.websocket
    }
}

fn parse_method(method: &str) -> Result<Method, ParseError> {
    let method = match method {
        "GET" => Method::GET,
        "HEAD" => Method::HEAD,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        "OPTIONS" => Method::OPTIONS,
        "CONNECT" => Method::CONNECT,
        "TRACE" => Method::TRACE,
        other => return Err(ParseError::invalid_method(other)),
    };
    Ok(method)
}

/// Splits a request target into `(path, query, fragment)`, fragment first.
fn split_target(target: &str) -> (&str, &str, &str) {
    let (rest, fragment) = target.split_once('#').unwrap_or((target, ""));
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    (path, query, fragment)
}

/// Parses `a=1&b&c=x=y` style query strings; the first `=` separates key and value.
fn parse_query(query: &str) -> FieldMap {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect()
}

fn parse_cookies(cookie: &str) -> FieldMap {
    cookie
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (name.trim(), value.trim())
        })
        .collect()
}

fn parse_content_length(value: &str) -> i64 {
    value.parse::<u64>().ok().and_then(|length| i64::try_from(length).ok()).unwrap_or(-1)
}

fn is_websocket_upgrade(headers: &FieldMap) -> Result<bool, ParseError> {
    let connection = headers.get_or("connection", "").to_ascii_lowercase();
    let upgrade = headers.get_or("upgrade", "");
    if !connection.contains("upgrade") || !upgrade.eq_ignore_ascii_case("websocket") {
        return Ok(false);
    }

    let version = headers.parse_or("sec-websocket-version", 0u32);
    ensure!(
        version >= WEBSOCKET_VERSION,
        ParseError::invalid_websocket_request(format!("unsupported sec-websocket-version {version}"))
    );
    ensure!(
        !headers.get_or("sec-websocket-key", "").is_empty(),
        ParseError::invalid_websocket_request("missing sec-websocket-key")
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(fields: &[(&str, &str)]) -> FieldMap {
        fields.iter().copied().collect()
    }

    #[test]
    fn split_target_fragment_before_query() {
        assert_eq!(split_target("/a/b?x=1#top"), ("/a/b", "x=1", "top"));
        assert_eq!(split_target("/a#frag?notquery"), ("/a", "", "frag?notquery"));
        assert_eq!(split_target("/plain"), ("/plain", "", ""));
    }

    #[test]
    fn query_pairs() {
        let query = parse_query("a=1&flag&b=x=y&&A=2&Mode=Fast");

        assert_eq!(query.get("a"), Some("2"));
        assert_eq!(query.get("flag"), Some(""));
        assert_eq!(query.get("b"), Some("x=y"));
        assert_eq!(query.get("mode"), Some("Fast"));
        assert_eq!(query.iter().find(|(key, _)| key.eq_ignore_ascii_case("mode")), Some(("Mode", "Fast")));
        assert_eq!(query.len(), 4);
    }

    #[test]
    fn derived_fields() {
        let request = Request::from_parts(
            "POST",
            "/upload?name=a.png",
            1,
            headers(&[("host", "10.0.0.2:8080"), ("content-length", "42"), ("cookie", "session=abc; theme = dark")]),
        )
        .unwrap();

        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/upload");
        assert_eq!(request.query().get("name"), Some("a.png"));
        assert_eq!(request.content_length(), 42);
        assert_eq!(request.host(), "10.0.0.2:8080");
        assert_eq!(request.cookies().get("session"), Some("abc"));
        assert_eq!(request.cookies().get("theme"), Some("dark"));
        assert_eq!(request.header("x-missing"), "");
        assert!(!request.is_websocket_request());
    }

    #[test]
    fn content_length_sentinel() {
        assert_eq!(parse_content_length(""), -1);
        assert_eq!(parse_content_length("abc"), -1);
        assert_eq!(parse_content_length("-5"), -1);
        assert_eq!(parse_content_length("0"), 0);
        assert_eq!(parse_content_length("18446744073709551615"), -1);
    }

    #[test]
    fn unknown_method_rejected() {
        let result = Request::from_parts("PATCH", "/", 1, FieldMap::new());
        assert!(matches!(result, Err(ParseError::InvalidMethod { .. })));
    }

    #[test]
    fn transfer_encoding_rejected() {
        let result = Request::from_parts("POST", "/", 1, headers(&[("transfer-encoding", "chunked")]));
        assert!(matches!(result, Err(ParseError::UnsupportedTransferEncoding)));
    }

    #[test]
    fn websocket_detection() {
        let upgrade = headers(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "WebSocket"),
            ("sec-websocket-version", "13"),
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ]);
        assert!(Request::from_parts("GET", "/ws", 1, upgrade).unwrap().is_websocket_request());

        let old_version = headers(&[
            ("connection", "upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-version", "8"),
            ("sec-websocket-key", "x"),
        ]);
        assert!(matches!(
            Request::from_parts("GET", "/ws", 1, old_version),
            Err(ParseError::InvalidWebSocketRequest { .. })
        ));

        let other_upgrade = headers(&[("connection", "upgrade"), ("upgrade", "h2c")]);
        assert!(!Request::from_parts("GET", "/", 1, other_upgrade).unwrap().is_websocket_request());
    }
}
