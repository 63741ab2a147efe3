//! One media track: an encoded-frame source coupled to a packet pacer.
//!
//! ```text
//! FrameSource ──read_frame──▶ producer thread ──packetize──▶ PacketPacer ──UDP──▶
//! ```
//!
//! The producer thread is spawned by [`Track::start`] and joined by
//! [`Track::stop`]. The pacer's own pacing thread starts lazily on the
//! first committed packet.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::{FrameSource, Packetizer, TrackFormat, packetizer_for};
use crate::rtp::{PacerConfig, PacketPacer, PacketSink};

/// Which slot of a session a track occupies. The discriminant is the
/// `trackID` used in SDP and SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio = 0,
    Video = 1,
}

impl TrackKind {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Audio),
            1 => Some(Self::Video),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Audio => Self::Video,
            Self::Video => Self::Audio,
        }
    }

    /// Destination ports used until a peer negotiates others.
    pub fn default_ports(self) -> (u16, u16) {
        match self {
            Self::Audio => (5004, 5005),
            Self::Video => (5006, 5007),
        }
    }
}

/// Lifecycle of a track.
///
/// ```text
/// Idle → Configuring → Configured → Starting → Streaming → Stopping → Idle
/// ```
///
/// A failed configure falls back to `Idle`, a failed start to `Configured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Idle,
    Configuring,
    Configured,
    Starting,
    Streaming,
    Stopping,
}

pub struct Track {
    kind: TrackKind,
    format: TrackFormat,
    state: TrackState,
    pacer_config: PacerConfig,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    packetizer: Arc<Mutex<Box<dyn Packetizer>>>,
    pacer: Arc<PacketPacer>,
    destination_ports: (u16, u16),
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl Track {
    /// Create an idle track. Binds the pacer's RTP/RTCP sockets right away
    /// so the local ports can be advertised before streaming starts.
    pub fn new(
        kind: TrackKind,
        format: TrackFormat,
        source: Box<dyn FrameSource>,
        pacer_config: PacerConfig,
    ) -> Result<Self> {
        let packetizer = packetizer_for(&format)?;
        let pacer = PacketPacer::new(packetizer.clock_rate(), pacer_config)?;
        Ok(Self {
            kind,
            format,
            state: TrackState::Idle,
            pacer_config,
            source: Arc::new(Mutex::new(source)),
            packetizer: Arc::new(Mutex::new(packetizer)),
            pacer: Arc::new(pacer),
            destination_ports: kind.default_ports(),
            running: Arc::new(AtomicBool::new(false)),
            producer: None,
        })
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn format(&self) -> &TrackFormat {
        &self.format
    }

    /// Replace the format. Takes effect on the next configure; a streaming
    /// track must be restarted to pick it up.
    pub fn set_format(&mut self, format: TrackFormat) {
        if format != self.format {
            self.format = format;
            if self.state == TrackState::Configured {
                self.state = TrackState::Idle;
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self.state, TrackState::Configured | TrackState::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.state == TrackState::Streaming
    }

    /// Current outgoing bitrate in bits per second, 0 when not streaming.
    pub fn bitrate(&self) -> u64 {
        if self.is_streaming() {
            self.pacer.bitrate()
        } else {
            0
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.pacer.ssrc()
    }

    /// Local `(rtp, rtcp)` ports of the pacer's sockets.
    pub fn local_ports(&self) -> Option<(u16, u16)> {
        self.pacer.local_ports()
    }

    pub fn destination_ports(&self) -> (u16, u16) {
        self.destination_ports
    }

    /// Set where RTP and RTCP go. An odd or zero RTCP port is replaced by
    /// `rtp + 1`.
    pub fn set_destination_ports(&mut self, rtp: u16, rtcp: u16) {
        let rtcp = if rtcp == 0 { rtp.wrapping_add(1) } else { rtcp };
        self.destination_ports = (rtp, rtcp);
    }

    /// SDP media block for this track, addressed to the destination RTP port.
    pub fn media_description(&self) -> String {
        self.packetizer
            .lock()
            .media_description(self.destination_ports.0)
    }

    /// Prepare the source and packetizer for the current format.
    ///
    /// A no-op while streaming.
    pub fn configure(&mut self) -> Result<()> {
        if self.is_streaming() {
            return Ok(());
        }
        self.state = TrackState::Configuring;
        match self.try_configure() {
            Ok(()) => {
                self.state = TrackState::Configured;
                tracing::debug!(track = ?self.kind, format = ?self.format, "track configured");
                Ok(())
            }
            Err(e) => {
                self.state = TrackState::Idle;
                Err(e)
            }
        }
    }

    fn try_configure(&mut self) -> Result<()> {
        let mut packetizer = packetizer_for(&self.format)?;
        if packetizer.clock_rate() != self.pacer.clock_rate() {
            self.pacer.close();
            self.pacer = Arc::new(PacketPacer::new(packetizer.clock_rate(), self.pacer_config)?);
        }
        if let Some(sets) = self.source.lock().configure(&self.format)? {
            packetizer.set_parameter_sets(&sets);
        }
        *self.packetizer.lock() = packetizer;
        Ok(())
    }

    /// Start streaming to `address`, configuring first if needed.
    ///
    /// A no-op if already streaming. A track whose producer ended on its
    /// own (end of stream, pacing failure) is torn down and restarted.
    pub fn start(&mut self, address: IpAddr, ttl: u32) -> Result<()> {
        if self.is_streaming() {
            if self.producer.as_ref().is_some_and(|p| !p.is_finished()) {
                return Ok(());
            }
            tracing::debug!(track = ?self.kind, "producer ended, restarting track");
            self.stop();
        }
        if !self.is_configured() {
            self.configure()?;
        }

        self.state = TrackState::Starting;
        match self.try_start(address, ttl) {
            Ok(()) => {
                self.state = TrackState::Streaming;
                tracing::info!(
                    track = ?self.kind,
                    destination = %address,
                    rtp_port = self.destination_ports.0,
                    ssrc = format_args!("{:#010X}", self.ssrc()),
                    "track streaming"
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.pacer.reset();
                self.state = TrackState::Configured;
                Err(e)
            }
        }
    }

    fn try_start(&mut self, address: IpAddr, ttl: u32) -> Result<()> {
        let (rtp, rtcp) = self.destination_ports;
        self.pacer.set_time_to_live(ttl)?;
        self.pacer.set_destination(address, rtp, rtcp);
        self.source.lock().start()?;

        self.running.store(true, Ordering::Release);
        let producer = Producer {
            kind: self.kind,
            source: self.source.clone(),
            packetizer: self.packetizer.clone(),
            pacer: self.pacer.clone(),
            running: self.running.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("{:?}-producer", self.kind).to_lowercase())
            .spawn(move || producer.run());
        match handle {
            Ok(handle) => {
                self.producer = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.source.lock().stop();
                Err(e.into())
            }
        }
    }

    /// Stop streaming. Returns once the producer and pacing threads have
    /// exited. Safe to call on a stopped track.
    pub fn stop(&mut self) {
        if !self.is_streaming() && self.producer.is_none() {
            return;
        }
        self.state = TrackState::Stopping;
        self.running.store(false, Ordering::Release);
        // wakes a producer blocked on a full ring
        self.pacer.reset();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
        self.source.lock().stop();
        self.state = TrackState::Idle;
        tracing::info!(track = ?self.kind, "track stopped");
    }

    pub fn start_preview(&mut self) -> Result<()> {
        self.source.lock().start_preview()
    }

    pub fn stop_preview(&mut self) {
        self.source.lock().stop_preview();
    }

    /// Stop and release the sockets. The track cannot stream afterwards.
    pub fn release(&mut self) {
        self.stop();
        self.stop_preview();
        self.pacer.close();
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Producer {
    kind: TrackKind,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    packetizer: Arc<Mutex<Box<dyn Packetizer>>>,
    pacer: Arc<PacketPacer>,
    running: Arc<AtomicBool>,
}

impl Producer {
    fn run(self) {
        let mut frame = Vec::new();
        let mut frames: u64 = 0;
        while self.running.load(Ordering::Acquire) {
            let capture_ns = match self.source.lock().read_frame(&mut frame) {
                Ok(Some(ns)) => ns,
                Ok(None) => {
                    tracing::debug!(track = ?self.kind, frames, "frame source ended");
                    break;
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    tracing::error!(track = ?self.kind, error = %e, "frame source failed");
                    break;
                }
            };

            let sink: &dyn PacketSink = &*self.pacer;
            match self.packetizer.lock().packetize(&frame, capture_ns, sink) {
                Ok(()) => frames += 1,
                Err(RtspError::Interrupted) => {
                    tracing::debug!(track = ?self.kind, frames, "packet ring reset, producer exiting");
                    break;
                }
                Err(e) => {
                    tracing::error!(track = ?self.kind, error = %e, "packetizer failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioCodec, AudioQuality, TestPatternSource, VideoCodec, VideoQuality};
    use std::net::{Ipv4Addr, UdpSocket};
    use std::time::Duration;

    fn video_track() -> Track {
        let format = TrackFormat::video(VideoCodec::H264, VideoQuality::default());
        Track::new(
            TrackKind::Video,
            format,
            Box::new(TestPatternSource::new()),
            PacerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn ids_round_trip() {
        assert_eq!(TrackKind::from_id(TrackKind::Video.id()), Some(TrackKind::Video));
        assert_eq!(TrackKind::from_id(2), None);
    }

    #[test]
    fn configure_captures_parameter_sets() {
        let mut track = video_track();
        track.configure().unwrap();
        assert_eq!(track.state(), TrackState::Configured);
        let sdp = track.media_description();
        assert!(sdp.starts_with("m=video 5006 RTP/AVP 96\r\n"));
        assert!(sdp.contains("sprop-parameter-sets="));
    }

    #[test]
    fn stop_on_idle_track_is_noop() {
        let mut track = video_track();
        track.stop();
        assert_eq!(track.state(), TrackState::Idle);
        assert_eq!(track.bitrate(), 0);
    }

    #[test]
    fn start_stream_and_stop() {
        let receiver = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let format = TrackFormat::audio(AudioCodec::AmrNb, AudioQuality::default());
        let mut track = Track::new(
            TrackKind::Audio,
            format,
            Box::new(TestPatternSource::new()),
            PacerConfig::default(),
        )
        .unwrap();
        track.set_destination_ports(port, port + 1);
        track.start(Ipv4Addr::LOCALHOST.into(), 64).unwrap();
        assert!(track.is_streaming());

        // 31 frames are swallowed while the pacer warms up, 20 ms each
        let mut buf = [0u8; 1500];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(len, 12 + 2 + 31);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 32);

        track.stop();
        assert_eq!(track.state(), TrackState::Idle);
        assert!(!track.is_streaming());

        track.start(Ipv4Addr::LOCALHOST.into(), 64).unwrap();
        assert!(track.is_streaming());
        track.release();
    }

    #[test]
    fn changing_format_requires_reconfigure() {
        let mut track = video_track();
        track.configure().unwrap();
        let quality = VideoQuality {
            framerate: 30,
            ..VideoQuality::default()
        };
        track.set_format(TrackFormat::video(VideoCodec::H263, quality));
        assert!(!track.is_configured());
        track.configure().unwrap();
        assert!(track.media_description().contains("H263-1998/90000"));
    }
}
