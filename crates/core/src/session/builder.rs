use std::sync::Arc;

use crate::error::Result;
use crate::executor::Executor;
use crate::media::{
    AudioCodec, AudioQuality, Camera, EncoderApi, SourceFactory, TrackFormat, VideoCodec,
    VideoQuality,
};
use crate::rtp::PacerConfig;

use super::Session;
use super::track::{Track, TrackKind};

/// Default multicast TTL.
pub const DEFAULT_TTL: u32 = 64;

/// Collects the parameters of a [`Session`] before any socket is bound.
///
/// Cloning a builder is cheap; the RTSP server keeps one template and
/// derives a per-request copy from each DESCRIBE URI.
///
/// ```
/// use std::sync::Arc;
/// use rtsp::executor::InlineExecutor;
/// use rtsp::media::{AudioCodec, TestPatternFactory};
/// use rtsp::session::SessionBuilder;
///
/// let builder = SessionBuilder::new(Arc::new(TestPatternFactory), Arc::new(InlineExecutor::new()))
///     .with_audio_codec(Some(AudioCodec::AmrNb))
///     .with_destination("127.0.0.1");
/// assert_eq!(builder.time_to_live(), 64);
/// ```
#[derive(Clone)]
pub struct SessionBuilder {
    factory: Arc<dyn SourceFactory>,
    executor: Arc<dyn Executor>,
    video_codec: Option<VideoCodec>,
    audio_codec: Option<AudioCodec>,
    video_quality: VideoQuality,
    audio_quality: AudioQuality,
    camera: Camera,
    flash: bool,
    video_api: EncoderApi,
    audio_api: EncoderApi,
    destination: Option<String>,
    origin: Option<String>,
    ttl: u32,
    pacer: PacerConfig,
}

impl SessionBuilder {
    /// H.264 video at the default quality, no audio.
    pub fn new(factory: Arc<dyn SourceFactory>, executor: Arc<dyn Executor>) -> Self {
        Self {
            factory,
            executor,
            video_codec: Some(VideoCodec::H264),
            audio_codec: None,
            video_quality: VideoQuality::default(),
            audio_quality: AudioQuality::default(),
            camera: Camera::default(),
            flash: false,
            video_api: EncoderApi::default(),
            audio_api: EncoderApi::default(),
            destination: None,
            origin: None,
            ttl: DEFAULT_TTL,
            pacer: PacerConfig::default(),
        }
    }

    pub fn with_video_codec(mut self, codec: Option<VideoCodec>) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn with_audio_codec(mut self, codec: Option<AudioCodec>) -> Self {
        self.audio_codec = codec;
        self
    }

    pub fn with_video_quality(mut self, quality: VideoQuality) -> Self {
        self.video_quality = quality;
        self
    }

    pub fn with_audio_quality(mut self, quality: AudioQuality) -> Self {
        self.audio_quality = quality;
        self
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = camera;
        self
    }

    pub fn with_flash(mut self, flash: bool) -> Self {
        self.flash = flash;
        self
    }

    pub fn with_video_api(mut self, api: EncoderApi) -> Self {
        self.video_api = api;
        self
    }

    pub fn with_audio_api(mut self, api: EncoderApi) -> Self {
        self.audio_api = api;
        self
    }

    /// Host name or address the streams are sent to.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Address announced in the SDP `o=` line.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_time_to_live(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_pacer_config(mut self, config: PacerConfig) -> Self {
        self.pacer = config;
        self
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.video_codec
    }

    pub fn audio_codec(&self) -> Option<AudioCodec> {
        self.audio_codec
    }

    pub fn video_quality(&self) -> VideoQuality {
        self.video_quality
    }

    pub fn audio_quality(&self) -> AudioQuality {
        self.audio_quality
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn flash(&self) -> bool {
        self.flash
    }

    pub fn video_api(&self) -> EncoderApi {
        self.video_api
    }

    pub fn audio_api(&self) -> EncoderApi {
        self.audio_api
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn time_to_live(&self) -> u32 {
        self.ttl
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    pub(crate) fn video_format(&self) -> Option<TrackFormat> {
        self.video_codec.map(|codec| TrackFormat::Video {
            codec,
            quality: self.video_quality,
            camera: self.camera,
            flash: self.flash,
            api: self.video_api,
        })
    }

    pub(crate) fn audio_format(&self) -> Option<TrackFormat> {
        self.audio_codec.map(|codec| TrackFormat::Audio {
            codec,
            quality: self.audio_quality,
            api: self.audio_api,
        })
    }

    pub(crate) fn open_track(&self, kind: TrackKind, format: TrackFormat) -> Result<Track> {
        let source = self.factory.open(&format)?;
        Track::new(kind, format, source, self.pacer)
    }

    /// Open the sources and bind the sockets of every selected track.
    pub fn build(&self) -> Result<Session> {
        let audio = self
            .audio_format()
            .map(|format| self.open_track(TrackKind::Audio, format))
            .transpose()?;
        let video = self
            .video_format()
            .map(|format| self.open_track(TrackKind::Video, format))
            .transpose()?;
        tracing::debug!(
            audio = ?self.audio_codec,
            video = ?self.video_codec,
            destination = ?self.destination,
            ttl = self.ttl,
            "building session"
        );
        Ok(Session::from_parts(self.clone(), audio, video))
    }
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("video_codec", &self.video_codec)
            .field("audio_codec", &self.audio_codec)
            .field("video_quality", &self.video_quality)
            .field("audio_quality", &self.audio_quality)
            .field("destination", &self.destination)
            .field("origin", &self.origin)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
