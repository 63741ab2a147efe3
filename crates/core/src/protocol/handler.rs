use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::error::Result;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::uri::UriParser;
use crate::server::{ServerConfig, ServerEvent};
use crate::session::transport::TransportHeader;
use crate::session::{Session, SessionBuilder, SessionRegistry, TrackKind, resolve};

/// Session token handed to every client. Each connection has exactly one
/// session, so the token only needs to be echoed back.
pub const SESSION_ID: &str = "1185d20035702ca";

const PUBLIC_METHODS: &str = "DESCRIBE,SETUP,TEARDOWN,PLAY,PAUSE";

/// Handles RTSP method requests for a single TCP connection.
///
/// Owns the connection's [`Session`], created on DESCRIBE and registered
/// in the server's [`SessionRegistry`] so aggregate streaming state can be
/// queried. [`close`](Self::close) stops and releases it.
pub struct MethodHandler {
    registry: SessionRegistry,
    template: SessionBuilder,
    config: Arc<ServerConfig>,
    events: Sender<ServerEvent>,
    connection_id: u64,
    local_addr: SocketAddr,
    client_addr: SocketAddr,
    session: Option<Session>,
}

impl MethodHandler {
    pub fn new(
        registry: SessionRegistry,
        template: SessionBuilder,
        config: Arc<ServerConfig>,
        events: Sender<ServerEvent>,
        local_addr: SocketAddr,
        client_addr: SocketAddr,
    ) -> Self {
        MethodHandler {
            connection_id: registry.next_id(),
            registry,
            template,
            config,
            events,
            local_addr,
            client_addr,
            session: None,
        }
    }

    /// The session created by the last DESCRIBE, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0").trim().to_string();

        let result = match request.method.as_str() {
            "OPTIONS" => Ok(self.handle_options(&cseq)),
            "DESCRIBE" => self.handle_describe(&cseq, &request.uri),
            "SETUP" => self.handle_setup(&cseq, request),
            "PLAY" => Ok(self.handle_play(&cseq)),
            "PAUSE" | "TEARDOWN" => Ok(RtspResponse::ok().add_header("CSeq", &cseq)),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                Ok(RtspResponse::bad_request().add_header("CSeq", &cseq))
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    peer = %self.client_addr,
                    method = %request.method,
                    error = %e,
                    "request failed"
                );
                post(
                    &self.events,
                    ServerEvent::StartFailed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                );
                RtspResponse::internal_error().add_header("CSeq", &cseq)
            }
        };
        response.with_server(&self.config.server_name)
    }

    /// Response to a request that could not be parsed.
    pub fn bad_request(&self) -> RtspResponse {
        RtspResponse::bad_request().with_server(&self.config.server_name)
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", PUBLIC_METHODS)
    }

    /// Host announced as origin and used in `RTP-Info` URLs.
    fn local_host(&self) -> String {
        match &self.config.public_host {
            Some(host) => host.clone(),
            None => self.local_addr.ip().to_string(),
        }
    }

    fn handle_describe(&mut self, cseq: &str, uri: &str) -> Result<RtspResponse> {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let mut builder = UriParser::parse(uri, &self.template)?.with_origin(self.local_host());
        if builder.destination().is_none() {
            builder = builder.with_destination(self.client_addr.ip().to_string());
        }
        let session = builder.build()?;

        if let Some(previous) = self.session.replace(session.clone()) {
            previous.sync_stop();
            previous.release();
        }
        self.registry.insert(self.connection_id, session.clone());

        session.sync_configure()?;
        let sdp = session.session_description()?;

        Ok(RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header(
                "Content-Base",
                &format!("{}:{}/", self.local_host(), self.local_addr.port()),
            )
            .add_header("Content-Type", "application/sdp")
            .with_body(sdp))
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> Result<RtspResponse> {
        let Some(track_id) = track_id(&request.uri) else {
            tracing::warn!(uri = %request.uri, "SETUP without trackID");
            return Ok(RtspResponse::bad_request().add_header("CSeq", cseq));
        };

        let session = match &self.session {
            Some(session) if session.track_exists(track_id) => session.clone(),
            _ => {
                tracing::warn!(track_id, "SETUP for unknown track");
                return Ok(RtspResponse::not_found().add_header("CSeq", cseq));
            }
        };
        let Some(kind) = TrackKind::from_id(track_id) else {
            return Ok(RtspResponse::not_found().add_header("CSeq", cseq));
        };
        let Some(before) = session.track_info(kind) else {
            return Ok(RtspResponse::not_found().add_header("CSeq", cseq));
        };

        let (rtp, rtcp) = request
            .get_header("Transport")
            .and_then(|value| TransportHeader::parse(value).client_ports)
            .unwrap_or(before.destination_ports);
        session.set_destination_ports(kind, rtp, rtcp)?;

        session.sync_start_track(kind)?;
        self.report_transition();

        let Some(info) = session.track_info(kind) else {
            return Ok(RtspResponse::not_found().add_header("CSeq", cseq));
        };
        let destination = session.destination().unwrap_or_default();
        let multicast = resolve(&destination).is_ok_and(|address| address.is_multicast());
        let (server_rtp, server_rtcp) = info.local_ports.unwrap_or_default();
        let (client_rtp, client_rtcp) = info.destination_ports;

        tracing::info!(
            peer = %self.client_addr,
            track = ?kind,
            destination = %destination,
            client_rtp,
            server_rtp,
            "track set up"
        );

        let transport = format!(
            "RTP/AVP/UDP;{};destination={};client_port={}-{};server_port={}-{};ssrc={:x};mode=play",
            if multicast { "multicast" } else { "unicast" },
            destination,
            client_rtp,
            client_rtcp,
            server_rtp,
            server_rtcp,
            info.ssrc,
        );

        Ok(RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport)
            .add_header("Session", SESSION_ID)
            .add_header("Cache-Control", "no-cache"))
    }

    fn handle_play(&self, cseq: &str) -> RtspResponse {
        let host = self.local_host();
        let port = self.local_addr.port();
        let rtp_info: Vec<String> = [TrackKind::Audio, TrackKind::Video]
            .into_iter()
            .filter(|kind| {
                self.session
                    .as_ref()
                    .is_some_and(|s| s.track_exists(kind.id()))
            })
            .map(|kind| format!("url=rtsp://{host}:{port}/trackID={};seq=0", kind.id()))
            .collect();

        let mut response = RtspResponse::ok().add_header("CSeq", cseq);
        if !rtp_info.is_empty() {
            response = response.add_header("RTP-Info", &rtp_info.join(","));
        }
        response.add_header("Session", SESSION_ID)
    }

    /// Stop and release the connection's session. Fires
    /// [`ServerEvent::StreamingStopped`] if this was the last streaming
    /// session of the server.
    pub fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.sync_stop();
        self.registry.remove(self.connection_id);
        self.report_transition();
        session.release();
    }

    fn report_transition(&self) {
        match self.registry.streaming_transition() {
            Some(true) => post(&self.events, ServerEvent::StreamingStarted),
            Some(false) => post(&self.events, ServerEvent::StreamingStopped),
            None => {}
        }
    }
}

impl Drop for MethodHandler {
    fn drop(&mut self) {
        self.close();
    }
}

/// `trackID=<n>` anywhere in the URI, case-insensitive.
fn track_id(uri: &str) -> Option<u32> {
    let lower = uri.to_ascii_lowercase();
    let start = lower.find("trackid=")? + "trackid=".len();
    let digits: String = uri[start..]
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect();
    digits.parse().ok()
}

pub(crate) fn post(events: &Sender<ServerEvent>, event: ServerEvent) {
    if events.try_send(event).is_err() {
        tracing::trace!("server event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use crate::media::TestPatternFactory;
    use crossbeam_channel::{Receiver, unbounded};

    fn handler() -> (MethodHandler, Receiver<ServerEvent>) {
        let (tx, rx) = unbounded();
        let template =
            SessionBuilder::new(Arc::new(TestPatternFactory), Arc::new(InlineExecutor::new()));
        let handler = MethodHandler::new(
            SessionRegistry::new(),
            template,
            Arc::new(ServerConfig::default()),
            tx,
            "127.0.0.1:8086".parse().unwrap(),
            "127.0.0.1:40000".parse().unwrap(),
        );
        (handler, rx)
    }

    fn request(raw: &str) -> RtspRequest {
        RtspRequest::parse(raw).unwrap()
    }

    #[test]
    fn track_id_extraction() {
        assert_eq!(track_id("rtsp://h:8086/trackID=1"), Some(1));
        assert_eq!(track_id("rtsp://h:8086/?h264/TRACKID=0"), Some(0));
        assert_eq!(track_id("rtsp://h:8086/"), None);
        assert_eq!(track_id("rtsp://h:8086/trackID=video"), None);
    }

    #[test]
    fn options_lists_methods() {
        let (mut h, _) = handler();
        let resp = h.handle(&request("OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n"));
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Public"), Some(PUBLIC_METHODS));
        assert_eq!(resp.get_header("CSeq"), Some("1"));
    }

    #[test]
    fn unknown_method_is_bad_request() {
        let (mut h, _) = handler();
        let resp = h.handle(&request("RECORD rtsp://h/ RTSP/1.0\r\nCSeq: 9\r\n\r\n"));
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.get_header("CSeq"), Some("9"));
    }

    #[test]
    fn describe_defaults_destination_to_client() {
        let (mut h, _) = handler();
        let resp = h.handle(&request("DESCRIBE rtsp://127.0.0.1:8086/ RTSP/1.0\r\nCSeq: 2\r\n\r\n"));
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Content-Type"), Some("application/sdp"));
        assert_eq!(resp.get_header("Content-Base"), Some("127.0.0.1:8086/"));
        let body = resp.body.unwrap();
        assert!(body.contains("o=- "));
        assert!(body.contains(" IN IP4 127.0.0.1\r\n"));
        assert!(body.contains("c=IN IP4 127.0.0.1\r\n"));
    }

    #[test]
    fn garbled_uri_is_internal_error_and_event() {
        let (mut h, rx) = handler();
        let resp = h.handle(&request("DESCRIBE rtsp://h/?ttl=x RTSP/1.0\r\nCSeq: 2\r\n\r\n"));
        assert_eq!(resp.status_code, 500);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::StartFailed { .. })));
    }

    #[test]
    fn setup_errors() {
        let (mut h, _) = handler();
        let no_session = h.handle(&request(
            "SETUP rtsp://h/trackID=1 RTSP/1.0\r\nCSeq: 3\r\n\r\n",
        ));
        assert_eq!(no_session.status_code, 404);

        h.handle(&request("DESCRIBE rtsp://h/ RTSP/1.0\r\nCSeq: 2\r\n\r\n"));
        let no_track_id = h.handle(&request("SETUP rtsp://h/ RTSP/1.0\r\nCSeq: 4\r\n\r\n"));
        assert_eq!(no_track_id.status_code, 400);
        let missing = h.handle(&request(
            "SETUP rtsp://h/trackID=0 RTSP/1.0\r\nCSeq: 5\r\n\r\n",
        ));
        assert_eq!(missing.status_code, 404);
    }

    #[test]
    fn setup_starts_track_and_close_stops_it() {
        let (mut h, rx) = handler();
        h.handle(&request("DESCRIBE rtsp://h/ RTSP/1.0\r\nCSeq: 2\r\n\r\n"));
        let resp = h.handle(&request(
            "SETUP rtsp://h/trackID=1 RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP/UDP;unicast;client_port=41000-41001\r\n\r\n",
        ));
        assert_eq!(resp.status_code, 200);
        let transport = resp.get_header("Transport").unwrap();
        assert!(transport.starts_with("RTP/AVP/UDP;unicast;destination=127.0.0.1;client_port=41000-41001;server_port="));
        assert!(transport.ends_with(";mode=play"));
        assert_eq!(resp.get_header("Session"), Some(SESSION_ID));
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::StreamingStarted);

        let play = h.handle(&request("PLAY rtsp://h/ RTSP/1.0\r\nCSeq: 4\r\n\r\n"));
        assert_eq!(
            play.get_header("RTP-Info"),
            Some("url=rtsp://127.0.0.1:8086/trackID=1;seq=0")
        );

        h.close();
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::StreamingStopped);
    }

    #[test]
    fn streaming_events_track_the_aggregate_state() {
        let (mut first, rx) = handler();
        let mut second = MethodHandler::new(
            first.registry.clone(),
            first.template.clone(),
            first.config.clone(),
            first.events.clone(),
            "127.0.0.1:8086".parse().unwrap(),
            "127.0.0.1:40002".parse().unwrap(),
        );
        for (h, port) in [(&mut first, 42000), (&mut second, 42002)] {
            h.handle(&request("DESCRIBE rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n"));
            let setup = format!(
                "SETUP rtsp://h/trackID=1 RTSP/1.0\r\nCSeq: 2\r\n\
                 Transport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
                port,
                port + 1
            );
            assert_eq!(h.handle(&request(&setup)).status_code, 200);
        }
        assert_eq!(rx.try_recv(), Ok(ServerEvent::StreamingStarted));
        assert!(rx.try_recv().is_err());

        first.close();
        assert!(rx.try_recv().is_err());
        second.close();
        assert_eq!(rx.try_recv(), Ok(ServerEvent::StreamingStopped));
        assert!(rx.try_recv().is_err());
    }
}
