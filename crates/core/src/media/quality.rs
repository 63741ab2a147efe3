//! Encoder parameters carried by a track.

use std::fmt;

use super::{AudioCodec, VideoCodec};
use crate::error::{Result, RtspError};

/// Resolution, frame rate and target bitrate of a video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoQuality {
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    pub framerate: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            framerate: 20,
            width: 176,
            height: 144,
        }
    }
}

impl VideoQuality {
    /// Parse `bitrate-framerate-width-height`.
    ///
    /// Missing trailing fields keep their default; an empty string yields
    /// the default quality. Any field that is not a number is an error.
    pub fn parse(value: &str) -> Result<Self> {
        let mut quality = Self::default();
        let fields = split_fields("video quality", value, 4)?;
        let slots = [
            &mut quality.bitrate,
            &mut quality.framerate,
            &mut quality.width,
            &mut quality.height,
        ];
        for (slot, field) in slots.into_iter().zip(fields) {
            *slot = field;
        }
        Ok(quality)
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {} fps, {} bit/s",
            self.width, self.height, self.framerate, self.bitrate
        )
    }
}

/// Sampling rate and target bitrate of an audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioQuality {
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    /// Sampling rate in Hz.
    pub sampling_rate: u32,
}

impl Default for AudioQuality {
    fn default() -> Self {
        Self {
            bitrate: 32_000,
            sampling_rate: 8_000,
        }
    }
}

impl AudioQuality {
    /// Parse `bitrate-samplingrate`, with the same rules as
    /// [`VideoQuality::parse`].
    pub fn parse(value: &str) -> Result<Self> {
        let mut quality = Self::default();
        let fields = split_fields("audio quality", value, 2)?;
        let slots = [&mut quality.bitrate, &mut quality.sampling_rate];
        for (slot, field) in slots.into_iter().zip(fields) {
            *slot = field;
        }
        Ok(quality)
    }
}

/// Parse at most `max` dash-separated numbers.
fn split_fields(name: &str, value: &str, max: usize) -> Result<Vec<u32>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    let fields = value
        .split('-')
        .map(|field| {
            field
                .trim()
                .parse::<u32>()
                .map_err(|_| RtspError::invalid_parameter(name, value))
        })
        .collect::<Result<Vec<_>>>()?;
    if fields.len() > max {
        return Err(RtspError::invalid_parameter(name, value));
    }
    Ok(fields)
}

/// Which camera a video track captures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Camera {
    #[default]
    Back,
    Front,
}

impl Camera {
    pub fn toggled(self) -> Self {
        match self {
            Self::Back => Self::Front,
            Self::Front => Self::Back,
        }
    }
}

/// Encoder interface a source should drive, when it offers a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderApi {
    /// Let the source decide.
    #[default]
    Auto,
    /// Recorder-style encoder writing a container stream (`mr`).
    MediaRecorder,
    /// Buffer-based codec interface (`mc`).
    MediaCodec,
}

impl EncoderApi {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("mr") {
            Some(Self::MediaRecorder)
        } else if value.eq_ignore_ascii_case("mc") {
            Some(Self::MediaCodec)
        } else {
            None
        }
    }
}

/// Everything a [`FrameSource`](super::FrameSource) needs to set up one
/// track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFormat {
    Video {
        codec: VideoCodec,
        quality: VideoQuality,
        camera: Camera,
        flash: bool,
        api: EncoderApi,
    },
    Audio {
        codec: AudioCodec,
        quality: AudioQuality,
        api: EncoderApi,
    },
}

impl TrackFormat {
    pub fn video(codec: VideoCodec, quality: VideoQuality) -> Self {
        Self::Video {
            codec,
            quality,
            camera: Camera::default(),
            flash: false,
            api: EncoderApi::default(),
        }
    }

    pub fn audio(codec: AudioCodec, quality: AudioQuality) -> Self {
        Self::Audio {
            codec,
            quality,
            api: EncoderApi::default(),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }

    /// Target bitrate of the track in bits per second.
    pub fn bitrate(&self) -> u32 {
        match self {
            Self::Video { quality, .. } => quality.bitrate,
            Self::Audio { quality, .. } => quality.bitrate,
        }
    }
}
