use std::io::BufRead;

use crate::error::{ParseErrorKind, Result, RtspError};

/// An RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The server parses
/// incoming requests with [`parse`](Self::parse); the push client builds
/// outgoing ones with [`new`](Self::new) and
/// [`serialize`](Self::serialize).
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/trackID=1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: "RTSP/1.0".to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Parse an RTSP request from its text representation.
    ///
    /// Expects the request line and headers; anything after the blank line
    /// becomes the body. Returns [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_ascii_uppercase();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers: super::parse_headers(lines)?,
            body: body.to_string(),
        })
    }

    /// Read and parse the next request, `None` at end of stream.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<Self>> {
        let Some((head, body)) = super::read_message(reader)? else {
            return Ok(None);
        };
        let mut request = Self::parse(&head)?;
        request.body = body;
        Ok(Some(request))
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = body;
        self
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    ///
    /// Every RTSP request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Serialize to the RTSP text wire format. `Content-Length` is always
    /// written, `0` without a body.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
        request.push_str(&self.body);
        request
    }
}
