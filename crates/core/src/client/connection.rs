//! The TCP control connection of a push client.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::protocol::{DigestChallenge, RtspRequest, RtspResponse};
use crate::session::TransportHeader;
use crate::session::resolve;

/// How long a request may wait for its response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = "rtsp-streaming/0.1";

/// One RTSP control connection issuing ANNOUNCE, SETUP, RECORD, OPTIONS
/// and TEARDOWN against a single presentation URI.
pub struct ControlConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    uri: String,
    cseq: u32,
    session_id: Option<String>,
    credentials: Option<(String, String)>,
    challenge: Option<DigestChallenge>,
}

impl ControlConnection {
    /// Open a TCP connection to `host:port`. `path` is the presentation
    /// path on the server.
    pub fn connect(
        host: &str,
        port: u16,
        path: &str,
        credentials: Option<(String, String)>,
    ) -> Result<Self> {
        let address = SocketAddr::new(resolve(host)?, port);
        let stream = TcpStream::connect_timeout(&address, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(RESPONSE_TIMEOUT))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);

        tracing::debug!(%address, "control connection established");

        Ok(Self {
            reader,
            writer: stream,
            uri: presentation_uri(host, port, path),
            cseq: 0,
            session_id: None,
            credentials,
            challenge: None,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Announce the session description. Answers a Digest challenge once;
    /// a second `401` is a credential failure.
    pub fn announce(&mut self, sdp: &str) -> Result<()> {
        let uri = self.uri.clone();
        let response = self.send(
            RtspRequest::new("ANNOUNCE", &uri)
                .add_header("Content-Type", "application/sdp")
                .with_body(sdp.to_string()),
        )?;
        if let Some(server) = response.get_header("Server") {
            tracing::debug!(server, "RTSP server");
        }

        let response = match response.status_code {
            401 => {
                let header = response.get_header("WWW-Authenticate").ok_or_else(|| {
                    RtspError::Protocol("401 without WWW-Authenticate".to_string())
                })?;
                if self.credentials.is_none() {
                    return Err(RtspError::Authentication(
                        "server requires credentials".to_string(),
                    ));
                }
                self.challenge = Some(DigestChallenge::parse(header)?);
                let retry = self.send(
                    RtspRequest::new("ANNOUNCE", &uri)
                        .add_header("Content-Type", "application/sdp")
                        .with_body(sdp.to_string()),
                )?;
                if retry.status_code == 401 {
                    return Err(RtspError::Authentication("bad credentials".to_string()));
                }
                retry
            }
            _ => response,
        };

        match response.status_code {
            403 => Err(RtspError::Forbidden),
            _ => expect_success("ANNOUNCE", &response),
        }
    }

    /// Set up one track, offering `client_ports` to the server.
    ///
    /// Returns the `server_port` pair of the reply, if the server sent a
    /// usable one.
    pub fn setup(
        &mut self,
        track_id: u32,
        client_ports: (u16, u16),
    ) -> Result<Option<(u16, u16)>> {
        let uri = format!("{}/trackID={track_id}", self.uri);
        let transport = format!(
            "RTP/AVP/UDP;unicast;client_port={}-{};mode=receive",
            client_ports.0, client_ports.1
        );
        let request = RtspRequest::new("SETUP", &uri).add_header("Transport", &transport);
        let response = self.send(request)?;
        expect_success("SETUP", &response)?;

        Ok(response
            .get_header("Transport")
            .map(TransportHeader::parse)
            .and_then(|t| t.server_ports))
    }

    /// Ask the server to start recording what was set up.
    pub fn record(&mut self) -> Result<()> {
        let uri = self.uri.clone();
        let request = RtspRequest::new("RECORD", &uri).add_header("Range", "npt=0.000-");
        let response = self.send(request)?;
        tracing::debug!(status = response.status_code, "RECORD answered");
        expect_success("RECORD", &response)
    }

    /// Keep-alive request. Any response counts as alive.
    pub fn options(&mut self) -> Result<()> {
        let uri = self.uri.clone();
        self.send(RtspRequest::new("OPTIONS", &uri)).map(|_| ())
    }

    /// Best-effort TEARDOWN. The reply is not awaited and failures are
    /// ignored.
    pub fn teardown(&mut self) {
        let uri = self.uri.clone();
        let request = self.decorate(RtspRequest::new("TEARDOWN", &uri));
        if let Err(e) = self.writer.write_all(request.serialize().as_bytes()) {
            tracing::debug!(error = %e, "TEARDOWN not sent");
        }
    }

    pub fn close(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }

    fn decorate(&mut self, request: RtspRequest) -> RtspRequest {
        self.cseq += 1;
        let mut request = request
            .add_header("CSeq", &self.cseq.to_string())
            .add_header("User-Agent", USER_AGENT);
        if let Some(id) = &self.session_id {
            request = request.add_header("Session", id);
        }
        if let (Some(challenge), Some((username, password))) =
            (&self.challenge, &self.credentials)
        {
            let authorization =
                challenge.authorization(username, password, &request.method, &request.uri);
            request = request.add_header("Authorization", &authorization);
        }
        request
    }

    fn send(&mut self, request: RtspRequest) -> Result<RtspResponse> {
        let request = self.decorate(request);
        tracing::debug!(
            method = %request.method,
            uri = %request.uri,
            cseq = self.cseq,
            "request"
        );
        self.writer.write_all(request.serialize().as_bytes())?;

        let response = RtspResponse::read_from(&mut self.reader)?;
        tracing::debug!(status = response.status_code, "response");
        if let Some(session) = response.get_header("Session") {
            let id = session.split(';').next().unwrap_or(session).trim();
            if !id.is_empty() {
                self.session_id = Some(id.to_string());
            }
        }
        Ok(response)
    }
}

impl Drop for ControlConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// `rtsp://host:port/path`, with a leading `/` added to `path` if missing.
pub fn presentation_uri(host: &str, port: u16, path: &str) -> String {
    if path.starts_with('/') || path.is_empty() {
        format!("rtsp://{host}:{port}{path}")
    } else {
        format!("rtsp://{host}:{port}/{path}")
    }
}

fn expect_success(method: &str, response: &RtspResponse) -> Result<()> {
    if (200..300).contains(&response.status_code) {
        Ok(())
    } else {
        Err(RtspError::UnexpectedStatus {
            method: method.to_string(),
            status: response.status_code,
        })
    }
}
