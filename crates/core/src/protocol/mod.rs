//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol: parsing and
//! building requests and responses, routing server methods, Digest
//! credentials, request URI parameters and SDP generation.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! A body, when present, follows the blank line and is exactly
//! `Content-Length` bytes long.
//!
//! ## Supported methods
//!
//! | Method | RFC section | Role | Purpose |
//! |--------|-------------|------|---------|
//! | OPTIONS | §10.1 | both | Capability discovery, client keep-alive |
//! | DESCRIBE | §10.2 | server | Configure a session from the URI, return SDP |
//! | ANNOUNCE | §10.3 | client | Push our SDP to a remote server |
//! | SETUP | §10.4 | both | Negotiate UDP ports for one track |
//! | PLAY | §10.5 | server | Acknowledge playback |
//! | PAUSE | §10.6 | server | Acknowledged, no effect |
//! | RECORD | §10.11 | client | Start pushing |
//! | TEARDOWN | §10.7 | both | End the session |

pub mod auth;
pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;
pub mod uri;

use std::io::{self, BufRead};

pub use auth::DigestChallenge;
pub use handler::MethodHandler;
pub use request::RtspRequest;
pub use response::RtspResponse;
pub use uri::UriParser;

use crate::error::{ParseErrorKind, Result, RtspError};

/// Upper bound on a message body we are willing to buffer.
const MAX_BODY_LENGTH: usize = 64 * 1024;
/// Upper bound on one start or header line, terminator included.
const MAX_LINE_LENGTH: usize = 4096;
/// Upper bound on the start line and headers together.
const MAX_HEAD_LENGTH: usize = 64 * 1024;

/// Read one message from `reader`: the start line and headers up to the
/// blank line, then `Content-Length` bytes of body.
///
/// Blank lines before the start line are skipped. Returns `None` on a
/// clean end of stream between messages. An oversized line or head is an
/// `InvalidData` I/O error: the stream cannot be resynchronised after it.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<(String, String)>> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let limit = (MAX_LINE_LENGTH + 1) as u64;
        if io::Read::take(&mut *reader, limit).read_line(&mut line)? == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        if line.len() > MAX_LINE_LENGTH || head.len() + line.len() > MAX_HEAD_LENGTH {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "RTSP header too long").into());
        }
        if line.trim().is_empty() {
            if head.is_empty() {
                continue;
            }
            break;
        }
        head.push_str(&line);
    }

    let length = content_length(&head)?;
    if length > MAX_BODY_LENGTH {
        return Err(RtspError::Protocol(format!(
            "body of {length} bytes exceeds limit"
        )));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    Ok(Some((head, String::from_utf8_lossy(&body).into_owned())))
}

fn content_length(head: &str) -> Result<usize> {
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("Content-Length")
        {
            return value.trim().parse().map_err(|_| RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            });
        }
    }
    Ok(0)
}

/// Split `Name: value` header lines, stopping at the first blank line.
pub(crate) fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(RtspError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}
