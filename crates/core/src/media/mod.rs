//! Media codecs and RTP packetization.
//!
//! A [`Packetizer`] turns one encoded frame into RTP packets and commits
//! them to a [`PacketSink`]. The sink owns sequence numbers, SSRC and
//! pacing; packetizers only write payload, timestamps and marker bits.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Clock |
//! |-------|--------|-----|-------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | 90 kHz |
//! | H.263 | [`h263`] | [RFC 4629](https://tools.ietf.org/html/rfc4629) | 90 kHz |
//! | AAC   | [`aac`]  | [RFC 3640](https://tools.ietf.org/html/rfc3640) | sampling rate |
//! | AMR-NB | [`amr`] | [RFC 4867](https://tools.ietf.org/html/rfc4867) | 8 kHz |
//!
//! Frames come from a [`FrameSource`], the boundary to whatever captures
//! and encodes media.

pub mod aac;
pub mod amr;
pub mod h263;
pub mod h264;
pub mod quality;
pub mod source;

pub use quality::{AudioQuality, Camera, EncoderApi, TrackFormat, VideoQuality};
pub use source::{FrameSource, ParameterSets, SourceFactory, TestPatternFactory, TestPatternSource};

use crate::error::Result;
use crate::rtp::PacketSink;

/// Codec-specific RTP packetizer.
///
/// ## Implementing a new codec
///
/// 1. Create a new module (e.g. `media/opus.rs`)
/// 2. Implement `Packetizer` for your type
/// 3. Add a variant to [`VideoCodec`] or [`AudioCodec`] and map it in
///    [`packetizer_for`]
pub trait Packetizer: Send {
    /// Split one encoded frame captured at `capture_ns` into RTP packets
    /// and commit them to `sink`.
    fn packetize(&mut self, frame: &[u8], capture_ns: u64, sink: &dyn PacketSink) -> Result<()>;

    /// Encoding name as it appears in `a=rtpmap`.
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// SDP media block for this track: the `m=` line followed by its
    /// `a=rtpmap`/`a=fmtp` attributes, each CRLF-terminated. `port` is the
    /// destination RTP port.
    fn media_description(&self, port: u16) -> String;

    /// Out-of-band codec configuration learned while configuring the
    /// source. Only H.264 uses it.
    fn set_parameter_sets(&mut self, _sets: &ParameterSets) {}
}

/// Video encodings a session can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H263,
}

/// Audio encodings a session can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    AmrNb,
}

/// Build the packetizer matching a track format.
pub fn packetizer_for(format: &TrackFormat) -> Result<Box<dyn Packetizer>> {
    Ok(match format {
        TrackFormat::Video { codec, .. } => match codec {
            VideoCodec::H264 => Box::new(h264::H264Packetizer::new()),
            VideoCodec::H263 => Box::new(h263::H263Packetizer::new()),
        },
        TrackFormat::Audio { codec, quality, .. } => match codec {
            AudioCodec::Aac => Box::new(aac::AacPacketizer::new(quality.sampling_rate)?),
            AudioCodec::AmrNb => Box::new(amr::AmrPacketizer::new()),
        },
    })
}
