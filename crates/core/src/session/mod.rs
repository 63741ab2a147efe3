//! Streaming sessions.
//!
//! A [`Session`] owns at most one audio track (`trackID=0`) and one video
//! track (`trackID=1`), the address they stream to and the TTL used for
//! multicast. It is a cheap, clonable handle; all state sits behind one
//! lock per session.
//!
//! ## Lifecycle
//!
//! ```text
//! SessionBuilder::build ─▶ sync_configure ─▶ sync_start ─▶ sync_stop ─▶ release
//!                                    ▲                         │
//!                                    └─────────────────────────┘
//! ```
//!
//! The `sync_*` methods run on the calling thread and return their error.
//! [`configure`](Session::configure), [`start`](Session::start) and
//! [`stop`](Session::stop) queue the same work on the session's
//! [`Executor`]. Either way every failure is also published as a
//! [`SessionEvent::Error`], and no event is published while the session
//! lock is held.

pub mod builder;
pub mod registry;
pub mod track;
pub mod transport;

use std::net::{IpAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::error::{ErrorKind, Result, RtspError};
use crate::executor::Executor;
use crate::media::{AudioQuality, TrackFormat, VideoQuality};
use crate::protocol::sdp::{self, MediaSection};
use crate::rtp::sender_report::ntp_now;

pub use builder::SessionBuilder;
pub use registry::SessionRegistry;
pub use track::{Track, TrackKind, TrackState};
pub use transport::TransportHeader;

/// Bitrate updates are published this often while streaming.
pub const BITRATE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const EVENT_CAPACITY: usize = 256;
const DEFAULT_ORIGIN: &str = "127.0.0.1";

/// State changes of a session, drained from [`Session::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PreviewStarted,
    Configured,
    /// Every track of the session is streaming.
    Started,
    Stopped,
    Error {
        kind: ErrorKind,
        /// The track that failed, if the failure is track-specific.
        track: Option<TrackKind>,
        message: String,
    },
    /// Sum of the tracks' bitrates in bits per second. A final `0` follows
    /// the last streaming track stopping.
    BitrateUpdate(u64),
}

/// Snapshot of one track's addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub ssrc: u32,
    pub local_ports: Option<(u16, u16)>,
    pub destination_ports: (u16, u16),
    pub streaming: bool,
}

#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    events: Sender<SessionEvent>,
    receiver: Receiver<SessionEvent>,
    executor: Arc<dyn Executor>,
    polling: AtomicBool,
    /// NTP seconds at creation, used as SDP session id and version.
    created: u64,
}

struct Inner {
    builder: SessionBuilder,
    audio: Option<Track>,
    video: Option<Track>,
    destination: Option<String>,
    origin: String,
    ttl: u32,
}

/// What starting one track meant for the session as a whole.
struct StartOutcome {
    session_started: bool,
    first_streaming: bool,
}

impl Session {
    pub(crate) fn from_parts(
        builder: SessionBuilder,
        audio: Option<Track>,
        video: Option<Track>,
    ) -> Self {
        let (events, receiver) = bounded(EVENT_CAPACITY);
        let inner = Inner {
            destination: builder.destination().map(str::to_string),
            origin: builder.origin().unwrap_or(DEFAULT_ORIGIN).to_string(),
            ttl: builder.time_to_live(),
            audio,
            video,
            builder: builder.clone(),
        };
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                events,
                receiver,
                executor: builder.executor(),
                polling: AtomicBool::new(false),
                created: ntp_now() >> 32,
            }),
        }
    }

    /// Receiver of this session's events. Every clone shares one queue.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.shared.receiver.clone()
    }

    pub fn destination(&self) -> Option<String> {
        self.shared.inner.lock().destination.clone()
    }

    /// Host name or address the tracks stream to. Resolved on start.
    pub fn set_destination(&self, destination: impl Into<String>) {
        self.shared.inner.lock().destination = Some(destination.into());
    }

    pub fn origin(&self) -> String {
        self.shared.inner.lock().origin.clone()
    }

    pub fn set_origin(&self, origin: impl Into<String>) {
        self.shared.inner.lock().origin = origin.into();
    }

    pub fn time_to_live(&self) -> u32 {
        self.shared.inner.lock().ttl
    }

    pub fn set_time_to_live(&self, ttl: u32) {
        self.shared.inner.lock().ttl = ttl;
    }

    pub fn track_exists(&self, id: u32) -> bool {
        TrackKind::from_id(id).is_some_and(|kind| self.shared.inner.lock().track(kind).is_some())
    }

    pub fn track_info(&self, kind: TrackKind) -> Option<TrackInfo> {
        self.shared.inner.lock().track(kind).map(|track| TrackInfo {
            kind,
            ssrc: track.ssrc(),
            local_ports: track.local_ports(),
            destination_ports: track.destination_ports(),
            streaming: track.is_streaming(),
        })
    }

    pub fn set_destination_ports(&self, kind: TrackKind, rtp: u16, rtcp: u16) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let track = inner
            .track_mut(kind)
            .ok_or(RtspError::TrackNotFound(kind.id()))?;
        track.set_destination_ports(rtp, rtcp);
        Ok(())
    }

    /// Add a track, releasing any existing track of the same kind.
    pub fn add_track(&self, kind: TrackKind, format: TrackFormat) -> Result<()> {
        let builder = self.shared.inner.lock().builder.clone();
        let track = builder.open_track(kind, format)?;
        let previous = self.shared.inner.lock().slot(kind).replace(track);
        if let Some(mut previous) = previous {
            previous.release();
        }
        Ok(())
    }

    pub fn remove_track(&self, kind: TrackKind) {
        let removed = self.shared.inner.lock().slot(kind).take();
        if let Some(mut track) = removed {
            track.release();
            tracing::debug!(track = ?kind, "track removed");
        }
    }

    /// Change the video quality. A streaming track keeps its current
    /// quality until restarted.
    pub fn set_video_quality(&self, quality: VideoQuality) {
        let mut inner = self.shared.inner.lock();
        if let Some(track) = inner.track_mut(TrackKind::Video)
            && let TrackFormat::Video {
                codec,
                camera,
                flash,
                api,
                ..
            } = *track.format()
        {
            track.set_format(TrackFormat::Video {
                codec,
                quality,
                camera,
                flash,
                api,
            });
        }
    }

    pub fn set_audio_quality(&self, quality: AudioQuality) {
        let mut inner = self.shared.inner.lock();
        if let Some(track) = inner.track_mut(TrackKind::Audio)
            && let TrackFormat::Audio { codec, api, .. } = *track.format()
        {
            track.set_format(TrackFormat::Audio {
                codec,
                quality,
                api,
            });
        }
    }

    pub fn video_quality(&self) -> Option<VideoQuality> {
        match self.shared.inner.lock().track(TrackKind::Video)?.format() {
            TrackFormat::Video { quality, .. } => Some(*quality),
            TrackFormat::Audio { .. } => None,
        }
    }

    pub fn audio_quality(&self) -> Option<AudioQuality> {
        match self.shared.inner.lock().track(TrackKind::Audio)?.format() {
            TrackFormat::Audio { quality, .. } => Some(*quality),
            TrackFormat::Video { .. } => None,
        }
    }

    /// Session Description for the configured tracks.
    ///
    /// Fails with [`RtspError::NoDestination`] until a destination is set.
    pub fn session_description(&self) -> Result<String> {
        let inner = self.shared.inner.lock();
        let destination = inner.destination.as_deref().ok_or(RtspError::NoDestination)?;
        let media: Vec<MediaSection> = [TrackKind::Audio, TrackKind::Video]
            .into_iter()
            .filter_map(|kind| {
                inner.track(kind).map(|track| MediaSection {
                    track_id: kind.id(),
                    description: track.media_description(),
                })
            })
            .collect();
        Ok(sdp::generate_sdp(
            self.shared.created,
            &inner.origin,
            destination,
            &media,
        ))
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.inner.lock().is_streaming()
    }

    /// Sum of the tracks' bitrates in bits per second.
    pub fn bitrate(&self) -> u64 {
        let inner = self.shared.inner.lock();
        [TrackKind::Audio, TrackKind::Video]
            .into_iter()
            .filter_map(|kind| inner.track(kind))
            .map(Track::bitrate)
            .sum()
    }

    /// Configure every track that is not streaming.
    pub fn sync_configure(&self) -> Result<()> {
        let result = self.shared.inner.lock().configure();
        match result {
            Ok(()) => {
                self.post(SessionEvent::Configured);
                Ok(())
            }
            Err((kind, e)) => Err(self.report(Some(kind), e)),
        }
    }

    /// Queue [`sync_configure`](Self::sync_configure) on the executor.
    pub fn configure(&self) {
        let session = self.clone();
        self.shared.executor.execute(Box::new(move || {
            let _ = session.sync_configure();
        }));
    }

    /// Start one track. Does nothing if the track is absent or already
    /// streaming.
    pub fn sync_start_track(&self, kind: TrackKind) -> Result<()> {
        let result = self.shared.inner.lock().start_track(kind);
        match result {
            Ok(Some(outcome)) => {
                if outcome.session_started {
                    self.post(SessionEvent::Started);
                }
                if outcome.first_streaming {
                    self.schedule_bitrate_poll();
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(self.report(Some(kind), e)),
        }
    }

    /// Start video, then audio. If audio fails the video track is stopped
    /// again before the error is returned.
    pub fn sync_start(&self) -> Result<()> {
        self.sync_start_track(TrackKind::Video)?;
        if let Err(e) = self.sync_start_track(TrackKind::Audio) {
            self.stop_track(TrackKind::Video);
            return Err(e);
        }
        Ok(())
    }

    /// Queue [`sync_start`](Self::sync_start) on the executor.
    pub fn start(&self) {
        let session = self.clone();
        self.shared.executor.execute(Box::new(move || {
            let _ = session.sync_start();
        }));
    }

    fn stop_track(&self, kind: TrackKind) {
        if let Some(track) = self.shared.inner.lock().track_mut(kind) {
            track.stop();
        }
    }

    /// Stop both tracks. Safe to call when nothing streams.
    pub fn sync_stop(&self) {
        self.stop_track(TrackKind::Audio);
        self.stop_track(TrackKind::Video);
        self.post(SessionEvent::Stopped);
    }

    /// Queue [`sync_stop`](Self::sync_stop) on the executor.
    pub fn stop(&self) {
        let session = self.clone();
        self.shared.executor.execute(Box::new(move || session.sync_stop()));
    }

    /// Configure the video track and start its preview.
    pub fn start_preview(&self) -> Result<()> {
        let result = {
            let mut inner = self.shared.inner.lock();
            match inner.track_mut(TrackKind::Video) {
                Some(track) => track.configure().and_then(|()| track.start_preview()),
                None => return Ok(()),
            }
        };
        match result {
            Ok(()) => {
                self.post(SessionEvent::PreviewStarted);
                Ok(())
            }
            Err(e) => Err(self.report(Some(TrackKind::Video), e)),
        }
    }

    pub fn stop_preview(&self) {
        if let Some(track) = self.shared.inner.lock().track_mut(TrackKind::Video) {
            track.stop_preview();
        }
    }

    /// Capture from the other camera. A streaming video track is
    /// restarted on the new camera.
    pub fn switch_camera(&self) -> Result<()> {
        let result = self.shared.inner.lock().switch_camera();
        match result {
            Ok(true) => {
                self.post(SessionEvent::PreviewStarted);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(self.report(Some(TrackKind::Video), e)),
        }
    }

    /// Flip the torch flag of the video format. Applies on next configure.
    pub fn toggle_flash(&self) {
        let mut inner = self.shared.inner.lock();
        if let Some(track) = inner.track_mut(TrackKind::Video)
            && let TrackFormat::Video {
                codec,
                quality,
                camera,
                flash,
                api,
            } = *track.format()
        {
            track.set_format(TrackFormat::Video {
                codec,
                quality,
                camera,
                flash: !flash,
                api,
            });
        }
    }

    /// Stop and drop both tracks, closing their sockets.
    pub fn release(&self) {
        self.remove_track(TrackKind::Audio);
        self.remove_track(TrackKind::Video);
    }

    fn post(&self, event: SessionEvent) {
        match self.shared.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "session event queue full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn report(&self, track: Option<TrackKind>, error: RtspError) -> RtspError {
        tracing::error!(track = ?track, error = %error, "session operation failed");
        self.post(SessionEvent::Error {
            kind: error.kind(),
            track,
            message: error.to_string(),
        });
        error
    }

    fn schedule_bitrate_poll(&self) {
        if self.shared.polling.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        self.shared
            .executor
            .execute(Box::new(move || poll_bitrate(weak)));
    }

    /// Clear the poll flag of an idle session. Returns true when a start
    /// slipped in after the idle check and the caller must keep polling.
    fn release_poll(&self) -> bool {
        self.shared.polling.store(false, Ordering::Release);
        self.is_streaming() && !self.shared.polling.swap(true, Ordering::AcqRel)
    }
}

fn poll_bitrate(weak: Weak<Shared>) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let session = Session { shared };
    if !session.is_streaming() && !session.release_poll() {
        session.post(SessionEvent::BitrateUpdate(0));
        return;
    }
    session.post(SessionEvent::BitrateUpdate(session.bitrate()));
    let weak = Arc::downgrade(&session.shared);
    session.shared.executor.execute_after(
        BITRATE_POLL_INTERVAL,
        Box::new(move || poll_bitrate(weak)),
    );
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Session")
            .field("destination", &inner.destination)
            .field("origin", &inner.origin)
            .field("ttl", &inner.ttl)
            .field("audio", &inner.audio.as_ref().map(Track::state))
            .field("video", &inner.video.as_ref().map(Track::state))
            .finish()
    }
}

impl Inner {
    fn slot(&mut self, kind: TrackKind) -> &mut Option<Track> {
        match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        }
    }

    fn track(&self, kind: TrackKind) -> Option<&Track> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    fn track_mut(&mut self, kind: TrackKind) -> Option<&mut Track> {
        self.slot(kind).as_mut()
    }

    fn is_streaming(&self) -> bool {
        self.audio.as_ref().is_some_and(Track::is_streaming)
            || self.video.as_ref().is_some_and(Track::is_streaming)
    }

    fn configure(&mut self) -> std::result::Result<(), (TrackKind, RtspError)> {
        for kind in [TrackKind::Audio, TrackKind::Video] {
            if let Some(track) = self.track_mut(kind)
                && !track.is_streaming()
            {
                track.configure().map_err(|e| (kind, e))?;
            }
        }
        Ok(())
    }

    fn start_track(&mut self, kind: TrackKind) -> Result<Option<StartOutcome>> {
        let other_streaming = self.track(kind.other()).map(Track::is_streaming);
        let ttl = self.ttl;
        let destination = self.destination.clone();
        let Some(track) = self.track_mut(kind) else {
            return Ok(None);
        };
        if track.is_streaming() {
            return Ok(None);
        }
        let host = destination.ok_or(RtspError::NoDestination)?;
        let address = resolve(&host)?;
        track.start(address, ttl)?;
        Ok(Some(StartOutcome {
            session_started: other_streaming.unwrap_or(true),
            first_streaming: !other_streaming.unwrap_or(false),
        }))
    }

    /// Returns whether a video track was switched.
    fn switch_camera(&mut self) -> Result<bool> {
        let ttl = self.ttl;
        let destination = self.destination.clone();
        let Some(track) = self.track_mut(TrackKind::Video) else {
            return Ok(false);
        };
        let TrackFormat::Video {
            codec,
            quality,
            camera,
            flash,
            api,
        } = *track.format()
        else {
            return Ok(false);
        };

        let streaming = track.is_streaming();
        track.stop();
        track.stop_preview();
        track.set_format(TrackFormat::Video {
            codec,
            quality,
            camera: camera.toggled(),
            flash,
            api,
        });
        track.configure()?;
        track.start_preview()?;
        if streaming {
            let host = destination.ok_or(RtspError::NoDestination)?;
            track.start(resolve(&host)?, ttl)?;
        }
        tracing::debug!(camera = ?camera.toggled(), streaming, "camera switched");
        Ok(true)
    }
}

/// Resolve a host name or literal address, preferring IPv4.
pub(crate) fn resolve(host: &str) -> Result<IpAddr> {
    if let Ok(address) = host.parse::<IpAddr>() {
        return Ok(address);
    }
    let addresses: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|_| RtspError::UnknownHost(host.to_string()))?
        .map(|addr| addr.ip())
        .collect();
    addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| RtspError::UnknownHost(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use crate::media::{
        AudioCodec, FrameSource, ParameterSets, SourceFactory, TestPatternFactory,
        TestPatternSource,
    };

    fn builder(executor: Arc<InlineExecutor>) -> SessionBuilder {
        SessionBuilder::new(Arc::new(TestPatternFactory), executor)
    }

    fn drain(session: &Session) -> Vec<SessionEvent> {
        session.events().try_iter().collect()
    }

    #[test]
    fn description_requires_destination() {
        let session = builder(Arc::new(InlineExecutor::new())).build().unwrap();
        assert!(matches!(
            session.session_description(),
            Err(RtspError::NoDestination)
        ));

        session.set_destination("10.0.0.5");
        session.sync_configure().unwrap();
        let sdp = session.session_description().unwrap();
        assert!(sdp.contains("c=IN IP4 10.0.0.5\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));
        assert!(!sdp.contains("trackID=0"));
    }

    #[test]
    fn audio_block_precedes_video() {
        let session = builder(Arc::new(InlineExecutor::new()))
            .with_audio_codec(Some(AudioCodec::AmrNb))
            .with_destination("127.0.0.1")
            .build()
            .unwrap();
        let sdp = session.session_description().unwrap();
        let audio = sdp.find("m=audio 5004").unwrap();
        let video = sdp.find("m=video 5006").unwrap();
        assert!(audio < video);
        assert!(sdp[audio..video].contains("a=control:trackID=0\r\n"));
    }

    #[test]
    fn configure_posts_event() {
        let session = builder(Arc::new(InlineExecutor::new())).build().unwrap();
        session.configure();
        assert_eq!(drain(&session), vec![SessionEvent::Configured]);
    }

    #[test]
    fn start_without_destination_fails_both_ways() {
        let session = builder(Arc::new(InlineExecutor::new())).build().unwrap();
        let err = session.sync_start().unwrap_err();
        assert!(matches!(err, RtspError::NoDestination));
        let events = drain(&session);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SessionEvent::Error {
                kind: ErrorKind::InvalidDestination,
                track: Some(TrackKind::Video),
                ..
            }
        ));
    }

    #[test]
    fn unknown_host_is_reported() {
        let session = builder(Arc::new(InlineExecutor::new()))
            .with_destination("host.invalid")
            .build()
            .unwrap();
        assert!(matches!(
            session.sync_start_track(TrackKind::Video),
            Err(RtspError::UnknownHost(_))
        ));
        assert!(!session.is_streaming());
    }

    #[test]
    fn start_stop_and_bitrate_poll() {
        let executor = Arc::new(InlineExecutor::new());
        let session = builder(executor.clone())
            .with_destination("127.0.0.1")
            .build()
            .unwrap();
        session.sync_start().unwrap();
        assert!(session.is_streaming());

        let events = drain(&session);
        assert_eq!(events[0], SessionEvent::Started);
        assert!(matches!(events[1], SessionEvent::BitrateUpdate(_)));
        assert_eq!(executor.pending(), 1);

        session.sync_stop();
        assert!(!session.is_streaming());
        assert_eq!(session.bitrate(), 0);
        executor.run_delayed();
        assert_eq!(executor.pending(), 0);
        assert_eq!(
            drain(&session),
            vec![SessionEvent::Stopped, SessionEvent::BitrateUpdate(0)]
        );
        session.release();
        assert!(!session.track_exists(1));
    }

    #[test]
    fn poll_survives_a_start_racing_its_idle_check() {
        let executor = Arc::new(InlineExecutor::new());
        let session = builder(executor.clone())
            .with_destination("127.0.0.1")
            .build()
            .unwrap();
        session.sync_start().unwrap();
        assert_eq!(executor.pending(), 1);

        // A start that found the flag still set scheduled nothing; the
        // exiting poll has to take over.
        assert!(session.release_poll());
        assert!(session.shared.polling.load(Ordering::Acquire));

        session.sync_stop();
        assert!(!session.release_poll());
        assert!(!session.shared.polling.load(Ordering::Acquire));
        session.sync_start().unwrap();
        assert_eq!(executor.pending(), 2);
        session.release();
    }

    struct BusySource(TestPatternSource);

    impl FrameSource for BusySource {
        fn configure(&mut self, format: &TrackFormat) -> Result<Option<ParameterSets>> {
            self.0.configure(format)
        }

        fn start(&mut self) -> Result<()> {
            Err(RtspError::ResourceInUse("microphone busy".to_string()))
        }

        fn stop(&mut self) {
            self.0.stop();
        }

        fn read_frame(&mut self, frame: &mut Vec<u8>) -> std::io::Result<Option<u64>> {
            self.0.read_frame(frame)
        }
    }

    /// Video comes from the test pattern, the microphone is always busy.
    struct BusyMicrophone;

    impl SourceFactory for BusyMicrophone {
        fn open(&self, format: &TrackFormat) -> Result<Box<dyn FrameSource>> {
            let source = TestPatternSource::new();
            if format.is_video() {
                Ok(Box::new(source))
            } else {
                Ok(Box::new(BusySource(source)))
            }
        }
    }

    #[test]
    fn audio_failure_stops_video_again() {
        let executor = Arc::new(InlineExecutor::new());
        let session = SessionBuilder::new(Arc::new(BusyMicrophone), executor.clone())
            .with_audio_codec(Some(AudioCodec::AmrNb))
            .with_destination("127.0.0.1")
            .build()
            .unwrap();

        let err = session.sync_start().unwrap_err();
        assert!(matches!(err, RtspError::ResourceInUse(_)));
        assert!(!session.is_streaming());
        assert_eq!(
            session.track_info(TrackKind::Video).map(|info| info.streaming),
            Some(false)
        );

        let events = drain(&session);
        assert!(!events.contains(&SessionEvent::Started));
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::Error {
                kind: ErrorKind::ResourceInUse,
                track: Some(TrackKind::Audio),
                ..
            }
        )));

        executor.run_delayed();
        assert_eq!(drain(&session), vec![SessionEvent::BitrateUpdate(0)]);
        session.release();
    }

    #[test]
    fn adding_a_track_replaces_the_old_one() {
        let session = builder(Arc::new(InlineExecutor::new())).build().unwrap();
        let before = session.track_info(TrackKind::Video).unwrap();
        session
            .add_track(
                TrackKind::Video,
                TrackFormat::video(crate::media::VideoCodec::H263, VideoQuality::default()),
            )
            .unwrap();
        let after = session.track_info(TrackKind::Video).unwrap();
        assert_ne!(before.local_ports, after.local_ports);
        assert!(session.track_exists(1));
        assert!(!session.track_exists(0));
        assert!(!session.track_exists(7));
    }

    #[test]
    fn quality_changes_reach_the_track() {
        let session = builder(Arc::new(InlineExecutor::new())).build().unwrap();
        let quality = VideoQuality {
            width: 640,
            height: 480,
            ..VideoQuality::default()
        };
        session.set_video_quality(quality);
        assert_eq!(session.video_quality(), Some(quality));
        assert_eq!(session.audio_quality(), None);
    }

    #[test]
    fn switch_camera_posts_preview_started() {
        let session = builder(Arc::new(InlineExecutor::new())).build().unwrap();
        session.start_preview().unwrap();
        session.switch_camera().unwrap();
        assert_eq!(
            drain(&session),
            vec![SessionEvent::PreviewStarted, SessionEvent::PreviewStarted]
        );
    }
}
