use std::io::BufRead;

use crate::error::{ParseErrorKind, Result, RtspError};

/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// Server: rtsp-streaming/0.1\r\n
/// CSeq: 1\r\n
/// Content-Length: 142\r\n
/// Content-Type: application/sdp\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is always written, `0` without a body.
#[derive(Debug, Clone)]
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = "rtsp-streaming/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK: success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 404 Not Found: the requested resource does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 400 Bad Request: malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 500 Internal Server Error: the request was understood but failed.
    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    /// Replace the `Server` header value.
    pub fn with_server(mut self, name: &str) -> Self {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case("Server"));
        self.headers.insert(0, ("Server".to_string(), name.to_string()));
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Parse a response head: `RTSP/1.0 <code> <reason>` plus headers.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let status_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            })?;

        let invalid = || RtspError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        };
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().ok_or_else(invalid)?;
        if !version.starts_with("RTSP/") {
            return Err(invalid());
        }
        let status_code = parts
            .next()
            .and_then(|code| code.trim().parse().ok())
            .ok_or_else(invalid)?;
        let status_text = parts.next().unwrap_or("").trim().to_string();

        Ok(RtspResponse {
            status_code,
            status_text,
            headers: super::parse_headers(lines)?,
            body: None,
        })
    }

    /// Read and parse the next response, failing on end of stream.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (head, body) = super::read_message(reader)?.ok_or(RtspError::ConnectionLost)?;
        let mut response = Self::parse(&head)?;
        if !body.is_empty() {
            response.body = Some(body);
        }
        Ok(response)
    }

    /// Serialize to the RTSP text wire format.
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        let body = self.body.as_deref().unwrap_or("");
        response.push_str(&format!("Content-Length: {}\r\n", body.len()));
        response.push_str("\r\n");
        response.push_str(body);
        response
    }
}
