mod source;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, bounded, select};
use rtsp::media::{VideoCodec, VideoQuality};
use rtsp::{
    ClientConfig, ClientEvent, RtspClient, Server, ServerEvent, SessionBuilder, SessionEvent,
    WorkerExecutor,
};

use source::FileSourceFactory;

#[derive(Parser)]
#[command(
    name = "rtsp-streamer",
    about = "Serve or push an H.264 elementary stream over RTSP/RTP"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for receivers to DESCRIBE, SETUP and PLAY the stream
    Serve {
        /// Bind address (host:port)
        #[arg(long, short, default_value = "0.0.0.0:8086")]
        bind: String,
        /// H.264 Annex B file, played in a loop
        #[arg(long, short)]
        file: PathBuf,
        #[arg(long, default_value_t = 25)]
        fps: u32,
    },
    /// Announce the stream to a remote RTSP server and record to it
    Push {
        #[arg(long)]
        host: String,
        #[arg(long, short, default_value_t = 554)]
        port: u16,
        #[arg(long, default_value = "/live.sdp")]
        path: String,
        #[arg(long, short)]
        user: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long, short)]
        file: PathBuf,
        #[arg(long, default_value_t = 25)]
        fps: u32,
    },
}

fn template(file: PathBuf, fps: u32) -> rtsp::Result<SessionBuilder> {
    let executor = Arc::new(WorkerExecutor::new("session")?);
    let factory = Arc::new(FileSourceFactory { path: file, fps });
    Ok(SessionBuilder::new(factory, executor)
        .with_video_codec(Some(VideoCodec::H264))
        .with_video_quality(VideoQuality {
            framerate: fps,
            ..VideoQuality::default()
        }))
}

fn serve(bind: String, file: PathBuf, fps: u32) -> rtsp::Result<()> {
    let mut server = Server::new(&bind, template(file, fps)?);
    server.start()?;

    let (done, stop) = bounded(0);
    let events = server.events();
    let logger = thread::spawn(move || {
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(ServerEvent::StartFailed { kind, message }) => {
                        tracing::warn!(?kind, %message, "stream failed to start");
                    }
                    Ok(event) => tracing::info!(?event, "server event"),
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
            }
        }
    });

    if let Some(addr) = server.local_addr() {
        tracing::info!(%addr, "serving, press Enter to stop");
    }
    wait_for_enter();

    let _ = done.send(());
    let _ = logger.join();
    server.stop();
    Ok(())
}

fn push(config: ClientConfig, file: PathBuf, fps: u32) -> rtsp::Result<()> {
    let session = template(file, fps)?.build()?;
    let session_events = session.events();
    let client = RtspClient::new(session, config)?;
    client.start()?;

    let (done, stop) = bounded(0);
    let client_events = client.events();
    let logger = thread::spawn(move || log_push_events(client_events, session_events, stop));

    tracing::info!("pushing, press Enter to stop");
    wait_for_enter();

    let _ = done.send(());
    let _ = logger.join();
    client.release();
    Ok(())
}

fn log_push_events(
    client: Receiver<ClientEvent>,
    session: Receiver<SessionEvent>,
    stop: Receiver<()>,
) {
    loop {
        select! {
            recv(client) -> event => match event {
                Ok(ClientEvent::WrongCredentials) => tracing::error!("server rejected the credentials"),
                Ok(event) => tracing::info!(?event, "client event"),
                Err(_) => break,
            },
            recv(session) -> event => match event {
                Ok(SessionEvent::BitrateUpdate(bps)) => tracing::debug!(bps, "bitrate"),
                Ok(event) => tracing::info!(?event, "session event"),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
}

/// Block until a line or end of input arrives on stdin.
fn wait_for_enter() {
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let result = match Args::parse().command {
        Command::Serve { bind, file, fps } => serve(bind, file, fps),
        Command::Push {
            host,
            port,
            path,
            user,
            password,
            file,
            fps,
        } => push(
            ClientConfig {
                enabled: true,
                host,
                port,
                path,
                username: user,
                password,
            },
            file,
            fps,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "rtsp-streamer failed");
            ExitCode::FAILURE
        }
    }
}
