//! Session parameters carried in a request URI's query string.
//!
//! ```text
//! rtsp://phone:8086/?h264=500000-30-640-480&aac&unicast=10.0.0.5&ttl=16
//! ```
//!
//! | Parameter | Value | Effect |
//! |-----------|-------|--------|
//! | `h264`, `h263` | `[bitrate-fps-width-height]` | video codec and quality |
//! | `aac`, `amrnb` (`amr`) | `[bitrate-samplingrate]` | audio codec and quality |
//! | `flash` | `on` \| `off` | torch |
//! | `camera` | `back` \| `front` | capture camera |
//! | `multicast` | `[addr]`, default `228.5.6.7` | multicast destination |
//! | `unicast` | `addr` | unicast destination |
//! | `ttl` | integer ≥ 0 | multicast TTL |
//! | `videoapi`, `audioapi` | `mr` \| `mc` | encoder interface |
//!
//! Any parameter at all disables both default codecs, so `?aac` streams
//! audio only. A URI that names no codec keeps the defaults.

use url::Url;

use crate::error::{Result, RtspError};
use crate::media::{AudioCodec, AudioQuality, Camera, EncoderApi, VideoCodec, VideoQuality};
use crate::session::SessionBuilder;
use crate::session::resolve;

/// Multicast group used by a bare `multicast` parameter.
pub const DEFAULT_MULTICAST: &str = "228.5.6.7";

pub struct UriParser;

impl UriParser {
    /// Derive a session configuration from `uri`, starting from `template`.
    ///
    /// Unknown parameters are ignored; a known parameter with a value that
    /// cannot be honoured is an [`RtspError::InvalidParameter`].
    pub fn parse(uri: &str, template: &SessionBuilder) -> Result<SessionBuilder> {
        let url = parse_url(uri)?;
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            return Ok(template.clone());
        }

        let mut builder = template
            .clone()
            .with_video_codec(None)
            .with_audio_codec(None);

        for (name, value) in &pairs {
            builder = match name.to_ascii_lowercase().as_str() {
                "flash" => builder.with_flash(parse_switch(name, value)?),
                "camera" => {
                    let camera = if value.eq_ignore_ascii_case("back") {
                        Camera::Back
                    } else if value.eq_ignore_ascii_case("front") {
                        Camera::Front
                    } else {
                        return Err(RtspError::invalid_parameter(name, value));
                    };
                    builder.with_camera(camera)
                }
                "multicast" => {
                    if value.is_empty() {
                        builder.with_destination(DEFAULT_MULTICAST)
                    } else {
                        match resolve(value) {
                            Ok(address) if address.is_multicast() => {
                                builder.with_destination(value.as_str())
                            }
                            _ => return Err(RtspError::invalid_parameter(name, value)),
                        }
                    }
                }
                "unicast" if !value.is_empty() => builder.with_destination(value.as_str()),
                "unicast" => builder,
                "videoapi" => builder.with_video_api(parse_api(name, value)?),
                "audioapi" => builder.with_audio_api(parse_api(name, value)?),
                "ttl" => {
                    let ttl = value
                        .parse::<u32>()
                        .map_err(|_| RtspError::invalid_parameter(name, value))?;
                    builder.with_time_to_live(ttl)
                }
                "h264" => builder
                    .with_video_quality(VideoQuality::parse(value)?)
                    .with_video_codec(Some(VideoCodec::H264)),
                "h263" => builder
                    .with_video_quality(VideoQuality::parse(value)?)
                    .with_video_codec(Some(VideoCodec::H263)),
                "amrnb" | "amr" => builder
                    .with_audio_quality(AudioQuality::parse(value)?)
                    .with_audio_codec(Some(AudioCodec::AmrNb)),
                "aac" => builder
                    .with_audio_quality(AudioQuality::parse(value)?)
                    .with_audio_codec(Some(AudioCodec::Aac)),
                _ => {
                    tracing::debug!(parameter = %name, "ignoring unknown URI parameter");
                    builder
                }
            };
        }

        if builder.video_codec().is_none() && builder.audio_codec().is_none() {
            builder = builder
                .with_video_codec(template.video_codec())
                .with_audio_codec(template.audio_codec());
        }
        Ok(builder)
    }
}

fn parse_url(uri: &str) -> Result<Url> {
    match Url::parse(uri) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("rtsp://localhost/")
            .and_then(|base| base.join(uri))
            .map_err(|_| RtspError::invalid_parameter("uri", uri)),
        Err(_) => Err(RtspError::invalid_parameter("uri", uri)),
    }
}

fn parse_switch(name: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("on") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("off") {
        Ok(false)
    } else {
        Err(RtspError::invalid_parameter(name, value))
    }
}

fn parse_api(name: &str, value: &str) -> Result<EncoderApi> {
    EncoderApi::parse(value).ok_or_else(|| RtspError::invalid_parameter(name, value))
}
