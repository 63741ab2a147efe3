//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the body of DESCRIBE responses and ANNOUNCE requests:
//!
//! ```text
//! v=0                                        ← protocol version
//! o=- <ntp> <ntp> IN IP4 <origin>            ← origin, NTP seconds of creation
//! s=Unnamed                                  ← session name
//! i=N/A                                      ← session information
//! c=IN IP4 <destination>                     ← where RTP is sent
//! t=0 0                                      ← permanent session
//! a=recvonly                                 ← direction, seen from the peer
//! m=audio 5004 RTP/AVP 96                    ← audio block, trackID=0
//! a=rtpmap:96 AMR/8000
//! a=fmtp:96 octet-align=1;
//! a=control:trackID=0
//! m=video 5006 RTP/AVP 96                    ← video block, trackID=1
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1;...
//! a=control:trackID=1
//! ```

/// One track's media block, as produced by its packetizer.
#[derive(Debug, Clone)]
pub struct MediaSection {
    pub track_id: u32,
    /// `m=` line and attributes, each line CRLF-terminated.
    pub description: String,
}

/// Generate a session description. Media blocks are emitted in the order
/// given, each followed by its `a=control:trackID=<n>` line.
pub fn generate_sdp(
    timestamp: u64,
    origin: &str,
    destination: &str,
    media: &[MediaSection],
) -> String {
    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    sdp.push_str(&format!("o=- {timestamp} {timestamp} IN IP4 {origin}\r\n"));
    sdp.push_str("s=Unnamed\r\n");
    sdp.push_str("i=N/A\r\n");
    sdp.push_str(&format!("c=IN IP4 {destination}\r\n"));
    sdp.push_str("t=0 0\r\n");
    sdp.push_str("a=recvonly\r\n");
    for section in media {
        sdp.push_str(&section.description);
        sdp.push_str(&format!("a=control:trackID={}\r\n", section.track_id));
    }

    tracing::trace!(sdp, "session description");
    sdp
}
