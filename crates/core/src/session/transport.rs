use std::net::IpAddr;

/// Parsed RTSP `Transport` header (RFC 2326 §12.39).
///
/// Only the parameters this crate acts on are kept. Unknown parameters
/// and malformed port pairs are ignored rather than rejected, so a
/// peer's quirky header degrades to "use the ports we already have".
///
/// ## Wire format example
///
/// ```text
/// Client → Server (play):
///   Transport: RTP/AVP/UDP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP/UDP;unicast;destination=10.0.0.5;client_port=8000-8001;
///              server_port=39000-39001;ssrc=1a2b3c4d;mode=play
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    /// `client_port=RTP-RTCP`.
    pub client_ports: Option<(u16, u16)>,
    /// `server_port=RTP-RTCP`, present in replies.
    pub server_ports: Option<(u16, u16)>,
    /// `destination=addr`, if it parses as an IP address.
    pub destination: Option<IpAddr>,
    /// Whether the `multicast` flag was given.
    pub multicast: bool,
}

impl TransportHeader {
    /// Parse a `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001");
    /// assert_eq!(th.client_ports, Some((8000, 8001)));
    /// assert_eq!(th.server_ports, None);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").client_ports.is_none());
    /// ```
    pub fn parse(header: &str) -> Self {
        let mut parsed = Self::default();
        for part in header.split(';') {
            let part = part.trim();
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            match key.to_ascii_lowercase().as_str() {
                "client_port" => parsed.client_ports = parse_port_pair(value),
                "server_port" => parsed.server_ports = parse_port_pair(value),
                "destination" => parsed.destination = value.parse().ok(),
                "multicast" => parsed.multicast = true,
                _ => {}
            }
        }
        parsed
    }
}

/// `a-b`, or a lone `a` meaning `a-(a+1)`.
fn parse_port_pair(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((rtp, rtcp)) => Some((rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?)),
        None => {
            let rtp: u16 = value.trim().parse().ok()?;
            Some((rtp, rtp.checked_add(1)?))
        }
    }
}
