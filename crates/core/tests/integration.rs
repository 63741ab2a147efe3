//! Integration test: full RTSP handshake OPTIONS → DESCRIBE → SETUP → PLAY.
//!
//! Starts the server on an ephemeral port, connects with a TCP client,
//! verifies each response and checks that RTP arrives on the negotiated
//! client port.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use rtsp::media::TestPatternFactory;
use rtsp::{Server, ServerEvent, SessionBuilder, WorkerExecutor};

fn rtsp_request(stream: &mut TcpStream, request: &str) -> std::io::Result<String> {
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        response.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    // Parse Content-Length and read body if present
    if let Some(len) = response
        .lines()
        .find(|l| l.to_lowercase().starts_with("content-length:"))
        .and_then(|l| l.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        if len > 0 {
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            response.push_str(&String::from_utf8_lossy(&body));
        }
    }

    Ok(response)
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

fn start_server() -> Server {
    let executor = Arc::new(WorkerExecutor::new("test-session").unwrap());
    let template = SessionBuilder::new(Arc::new(TestPatternFactory), executor);
    let mut server = Server::new("127.0.0.1:0", template);
    server.start().expect("server start");
    server
}

fn connect(server: &Server) -> TcpStream {
    let addr = server.local_addr().expect("bound address");
    let stream =
        TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
        .set_write_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

#[test]
fn full_handshake_options_describe_setup_play() {
    let mut server = start_server();
    let events = server.events();
    let port = server.local_addr().unwrap().port();
    let mut stream = connect(&server);

    let base_uri = format!("rtsp://127.0.0.1:{port}/?h264=300000-20-176-144");

    // OPTIONS
    let opt_resp = rtsp_request(
        &mut stream,
        &format!("OPTIONS {base_uri} RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
    )
    .expect("OPTIONS response");
    assert!(
        opt_resp.starts_with("RTSP/1.0 200 OK"),
        "OPTIONS: expected 200 OK, got: {}",
        status_line(&opt_resp)
    );
    assert_eq!(
        header(&opt_resp, "Public"),
        Some("DESCRIBE,SETUP,TEARDOWN,PLAY,PAUSE")
    );

    // DESCRIBE
    let desc_resp = rtsp_request(
        &mut stream,
        &format!("DESCRIBE {base_uri} RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n"),
    )
    .expect("DESCRIBE response");
    assert!(
        desc_resp.starts_with("RTSP/1.0 200 OK"),
        "DESCRIBE: got {}",
        status_line(&desc_resp)
    );
    assert_eq!(header(&desc_resp, "Content-Type"), Some("application/sdp"));
    assert_eq!(
        header(&desc_resp, "Content-Base"),
        Some(format!("127.0.0.1:{port}/").as_str())
    );
    assert!(desc_resp.contains("c=IN IP4 127.0.0.1\r\n"));
    assert!(desc_resp.contains("m=video "));
    assert!(desc_resp.contains("a=rtpmap:96 H264/90000\r\n"));
    assert!(desc_resp.contains("a=control:trackID=1\r\n"));
    assert!(!desc_resp.contains("m=audio"));

    // SETUP of a track the session does not have
    let missing = rtsp_request(
        &mut stream,
        &format!(
            "SETUP rtsp://127.0.0.1:{port}/trackID=0 RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n"
        ),
    )
    .expect("SETUP response");
    assert!(missing.starts_with("RTSP/1.0 404"), "got {}", status_line(&missing));

    // SETUP video onto a local receiver
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    let rtp_port = receiver.local_addr().unwrap().port();
    let setup_resp = rtsp_request(
        &mut stream,
        &format!(
            "SETUP rtsp://127.0.0.1:{port}/trackID=1 RTSP/1.0\r\nCSeq: 4\r\n\
             Transport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
            rtp_port,
            rtp_port + 1
        ),
    )
    .expect("SETUP response");
    assert!(
        setup_resp.starts_with("RTSP/1.0 200 OK"),
        "SETUP: got {}",
        status_line(&setup_resp)
    );
    assert_eq!(header(&setup_resp, "Session"), Some("1185d20035702ca"));
    assert_eq!(header(&setup_resp, "Cache-Control"), Some("no-cache"));
    let transport = header(&setup_resp, "Transport").expect("Transport header");
    assert!(transport.starts_with("RTP/AVP/UDP;unicast;destination=127.0.0.1;"));
    assert!(transport.contains(&format!("client_port={}-{}", rtp_port, rtp_port + 1)));
    assert!(transport.contains("server_port="));
    assert!(transport.contains(";ssrc="));
    assert!(transport.ends_with(";mode=play"));

    assert!(server.is_streaming());
    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)),
        Ok(ServerEvent::StreamingStarted)
    );

    // The first packet on the wire carries sequence number 32.
    let mut packet = [0u8; 2048];
    let len = receiver.recv(&mut packet).expect("RTP packet");
    assert!(len > 12);
    assert_eq!(packet[0] >> 6, 2, "RTP version");
    assert_eq!(packet[1] & 0x7f, 96, "payload type");
    assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 32);

    // PLAY
    let play_resp = rtsp_request(
        &mut stream,
        &format!(
            "PLAY rtsp://127.0.0.1:{port}/ RTSP/1.0\r\nCSeq: 5\r\nSession: 1185d20035702ca\r\n\r\n"
        ),
    )
    .expect("PLAY response");
    assert!(play_resp.starts_with("RTSP/1.0 200 OK"));
    assert_eq!(
        header(&play_resp, "RTP-Info"),
        Some(format!("url=rtsp://127.0.0.1:{port}/trackID=1;seq=0").as_str())
    );

    // TEARDOWN is acknowledged; closing the connection stops the stream.
    let teardown = rtsp_request(
        &mut stream,
        &format!(
            "TEARDOWN rtsp://127.0.0.1:{port}/ RTSP/1.0\r\nCSeq: 6\r\nSession: 1185d20035702ca\r\n\r\n"
        ),
    )
    .expect("TEARDOWN response");
    assert!(teardown.starts_with("RTSP/1.0 200 OK"));

    drop(stream);
    assert_eq!(
        events.recv_timeout(Duration::from_secs(2)),
        Ok(ServerEvent::StreamingStopped)
    );
    assert!(!server.is_streaming());
    assert_eq!(server.bitrate(), 0);

    server.stop();
    assert!(!server.is_running());
}

#[test]
fn setup_without_transport_reuses_default_ports() {
    let mut server = start_server();
    let port = server.local_addr().unwrap().port();
    let mut stream = connect(&server);

    let desc = rtsp_request(
        &mut stream,
        &format!("DESCRIBE rtsp://127.0.0.1:{port}/ RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
    )
    .unwrap();
    assert!(desc.starts_with("RTSP/1.0 200 OK"));

    let setup = rtsp_request(
        &mut stream,
        &format!("SETUP rtsp://127.0.0.1:{port}/trackID=1 RTSP/1.0\r\nCSeq: 2\r\n\r\n"),
    )
    .unwrap();
    assert!(setup.starts_with("RTSP/1.0 200 OK"), "got {}", status_line(&setup));
    let transport = header(&setup, "Transport").unwrap();
    assert!(transport.contains("client_port=5006-5007"), "{transport}");

    server.stop();
}

#[test]
fn malformed_requests_get_400() {
    let mut server = start_server();
    let port = server.local_addr().unwrap().port();
    let mut stream = connect(&server);

    let no_track = rtsp_request(
        &mut stream,
        &format!("SETUP rtsp://127.0.0.1:{port}/ RTSP/1.0\r\nCSeq: 1\r\n\r\n"),
    )
    .unwrap();
    assert!(no_track.starts_with("RTSP/1.0 400"), "got {}", status_line(&no_track));

    let unknown = rtsp_request(
        &mut stream,
        &format!("GET_PARAMETER rtsp://127.0.0.1:{port}/ RTSP/1.0\r\nCSeq: 2\r\n\r\n"),
    )
    .unwrap();
    assert!(unknown.starts_with("RTSP/1.0 400"));
    assert_eq!(header(&unknown, "CSeq"), Some("2"));

    let garbled = rtsp_request(&mut stream, "hello\r\n\r\n").unwrap();
    assert!(garbled.starts_with("RTSP/1.0 400"), "got {}", status_line(&garbled));

    // The connection survives bad requests.
    let options = rtsp_request(
        &mut stream,
        &format!("OPTIONS rtsp://127.0.0.1:{port}/ RTSP/1.0\r\nCSeq: 3\r\n\r\n"),
    )
    .unwrap();
    assert!(options.starts_with("RTSP/1.0 200 OK"));

    server.stop();
}

#[test]
fn bind_failure_is_reported() {
    let first = start_server();
    let taken = first.local_addr().unwrap().to_string();

    let executor = Arc::new(WorkerExecutor::new("test-session").unwrap());
    let template = SessionBuilder::new(Arc::new(TestPatternFactory), executor);
    let mut second = Server::new(&taken, template);
    assert!(second.start().is_err());
    assert!(matches!(
        second.events().try_recv(),
        Ok(ServerEvent::BindFailed { .. })
    ));
}
