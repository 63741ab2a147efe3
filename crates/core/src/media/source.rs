//! The boundary to capture and encoding.
//!
//! Capture devices, encoders and preview surfaces live outside this crate.
//! A track only needs something that configures for a [`TrackFormat`] and
//! then yields encoded frames with their capture time.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use super::aac::sampling_rate_index;
use super::{AudioCodec, TrackFormat, VideoCodec};
use crate::error::Result;

/// H.264 sequence and picture parameter sets, without start codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

/// Produces encoded frames for one track.
///
/// Encoder failures are reported from [`configure`](Self::configure) and
/// [`start`](Self::start) with the matching [`RtspError`](crate::RtspError)
/// variant (`ResourceInUse`, `ConfigurationNotSupported`,
/// `StorageUnavailable`, `InvalidSurface`).
pub trait FrameSource: Send {
    /// Prepare the encoder. H.264 sources return their parameter sets so
    /// the session description can carry them before the first frame.
    fn configure(&mut self, format: &TrackFormat) -> Result<Option<ParameterSets>>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Read the next encoded frame into `frame`, replacing its contents.
    ///
    /// Returns the capture time in nanoseconds on a monotonic clock, or
    /// `None` at end of stream. `WouldBlock` and `TimedOut` errors mean no
    /// frame is ready yet.
    fn read_frame(&mut self, frame: &mut Vec<u8>) -> io::Result<Option<u64>>;

    fn start_preview(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop_preview(&mut self) {}
}

/// Opens a [`FrameSource`] for a track.
pub trait SourceFactory: Send + Sync {
    fn open(&self, format: &TrackFormat) -> Result<Box<dyn FrameSource>>;
}

const TEST_SPS: [u8; 10] = [0x67, 0x42, 0xc0, 0x1e, 0xd9, 0x00, 0xa0, 0x47, 0xfe, 0xc8];
const TEST_PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];
/// Capture clock origin, so the first frame never has timestamp zero.
const CLOCK_ORIGIN_NS: u64 = 1_000_000_000;

/// Synthetic encoder emitting well-formed frames of any supported codec
/// in real time, sized to the requested bitrate.
#[derive(Debug, Default)]
pub struct TestPatternSource {
    format: Option<TrackFormat>,
    interval: Duration,
    frame_size: usize,
    index: u64,
    started_at: Option<Instant>,
}

impl TestPatternSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_frame(&self, frame: &mut Vec<u8>) {
        let Some(format) = &self.format else {
            return;
        };
        let filler = 0x80 | (self.index as u8 & 0x7f);
        match format {
            TrackFormat::Video { codec, quality, .. } => match codec {
                VideoCodec::H264 => {
                    if self.index % u64::from(quality.framerate.max(1)) == 0 {
                        for nal in [&TEST_SPS[..], &TEST_PPS[..]] {
                            frame.extend_from_slice(&[0, 0, 0, 1]);
                            frame.extend_from_slice(nal);
                        }
                    }
                    frame.extend_from_slice(&[0, 0, 0, 1, 0x65]);
                    frame.resize(frame.len() + self.frame_size, filler);
                }
                VideoCodec::H263 => {
                    frame.extend_from_slice(&[0x00, 0x00, 0x80, 0x02]);
                    frame.resize(frame.len() + self.frame_size, filler);
                }
            },
            TrackFormat::Audio { codec, quality, .. } => match codec {
                AudioCodec::Aac => {
                    let sr_index = sampling_rate_index(quality.sampling_rate).unwrap_or(11);
                    let len = 7 + self.frame_size;
                    frame.extend_from_slice(&[
                        0xff,
                        0xf1,
                        (1 << 6) | (sr_index << 2),
                        (1 << 6) | ((len >> 11) & 0x03) as u8,
                        ((len >> 3) & 0xff) as u8,
                        (((len & 0x07) << 5) as u8) | 0x1f,
                        0xfc,
                    ]);
                    frame.resize(len, filler);
                }
                AudioCodec::AmrNb => {
                    // mode 7 (12.2 kbit/s), quality bit set
                    frame.push(0x3c);
                    frame.resize(32, filler);
                }
            },
        }
    }
}

impl FrameSource for TestPatternSource {
    fn configure(&mut self, format: &TrackFormat) -> Result<Option<ParameterSets>> {
        let (interval, frame_size, sets) = match format {
            TrackFormat::Video { codec, quality, .. } => {
                let fps = quality.framerate.max(1);
                let size = (quality.bitrate / 8 / fps).max(16) as usize;
                let sets = (*codec == VideoCodec::H264).then(|| ParameterSets {
                    sps: TEST_SPS.to_vec(),
                    pps: TEST_PPS.to_vec(),
                });
                (Duration::from_secs(1) / fps, size, sets)
            }
            TrackFormat::Audio { codec, quality, .. } => match codec {
                AudioCodec::Aac => {
                    let rate = quality.sampling_rate.max(1);
                    let size = (u64::from(quality.bitrate) * 1024 / 8 / u64::from(rate)).max(8);
                    let interval = Duration::from_nanos(1024 * 1_000_000_000 / u64::from(rate));
                    (interval, size as usize, None)
                }
                AudioCodec::AmrNb => (Duration::from_millis(20), 31, None),
            },
        };
        self.format = Some(format.clone());
        self.interval = interval;
        self.frame_size = frame_size;
        Ok(sets)
    }

    fn start(&mut self) -> Result<()> {
        self.index = 0;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        self.started_at = None;
    }

    fn read_frame(&mut self, frame: &mut Vec<u8>) -> io::Result<Option<u64>> {
        let Some(started_at) = self.started_at else {
            return Ok(None);
        };
        let offset = self.interval * self.index as u32;
        let due = started_at + offset;
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }

        frame.clear();
        self.build_frame(frame);
        self.index += 1;
        Ok(Some(CLOCK_ORIGIN_NS + offset.as_nanos() as u64))
    }
}

/// Opens a fresh [`TestPatternSource`] for every track.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestPatternFactory;

impl SourceFactory for TestPatternFactory {
    fn open(&self, _format: &TrackFormat) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(TestPatternSource::new()))
    }
}
