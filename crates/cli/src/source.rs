//! Frames read from an H.264 Annex B elementary stream file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rtsp::RtspError;
use rtsp::media::h264::H264Packetizer;
use rtsp::media::{FrameSource, ParameterSets, SourceFactory, TrackFormat, VideoCodec};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Plays an Annex B file in a loop at a fixed frame rate.
pub struct AnnexBFileSource {
    access_units: Vec<Vec<u8>>,
    sets: Option<ParameterSets>,
    interval: Duration,
    index: u64,
    started_at: Option<Instant>,
}

impl AnnexBFileSource {
    pub fn open(path: &Path, fps: u32) -> rtsp::Result<Self> {
        let data = fs::read(path)?;
        let (access_units, sets) = split_access_units(&data);
        if access_units.is_empty() {
            return Err(RtspError::ConfigurationNotSupported(format!(
                "no H.264 pictures in {}",
                path.display()
            )));
        }
        tracing::info!(
            file = %path.display(),
            frames = access_units.len(),
            fps,
            "loaded H.264 stream"
        );
        Ok(Self {
            access_units,
            sets,
            interval: Duration::from_secs(1) / fps.max(1),
            index: 0,
            started_at: None,
        })
    }
}

/// Group NAL units into access units, each ending with one picture slice,
/// and pick up the first SPS/PPS pair.
fn split_access_units(data: &[u8]) -> (Vec<Vec<u8>>, Option<ParameterSets>) {
    let mut units = Vec::new();
    let mut current = Vec::new();
    let mut sps = None;
    let mut pps = None;

    for nal in H264Packetizer::extract_nal_units(data) {
        let Some(&header) = nal.first() else {
            continue;
        };
        match header & 0x1f {
            7 if sps.is_none() => sps = Some(nal.to_vec()),
            8 if pps.is_none() => pps = Some(nal.to_vec()),
            _ => {}
        }
        current.extend_from_slice(&START_CODE);
        current.extend_from_slice(nal);
        if (1..=5).contains(&(header & 0x1f)) {
            units.push(std::mem::take(&mut current));
        }
    }

    let sets = sps.zip(pps).map(|(sps, pps)| ParameterSets { sps, pps });
    (units, sets)
}

impl FrameSource for AnnexBFileSource {
    fn configure(&mut self, format: &TrackFormat) -> rtsp::Result<Option<ParameterSets>> {
        match format {
            TrackFormat::Video {
                codec: VideoCodec::H264,
                ..
            } => Ok(self.sets.clone()),
            _ => Err(RtspError::ConfigurationNotSupported(
                "the file source only carries H.264 video".to_string(),
            )),
        }
    }

    fn start(&mut self) -> rtsp::Result<()> {
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

        let unit = &self.access_units[self.index as usize % self.access_units.len()];
        frame.clear();
        frame.extend_from_slice(unit);
        self.index += 1;
        // Offset by one second so the first frame is not at time zero.
        Ok(Some(1_000_000_000 + offset.as_nanos() as u64))
    }
}

/// Opens the same file for every video track a session asks for.
pub struct FileSourceFactory {
    pub path: PathBuf,
    pub fps: u32,
}

impl SourceFactory for FileSourceFactory {
    fn open(&self, format: &TrackFormat) -> rtsp::Result<Box<dyn FrameSource>> {
        if !matches!(format, TrackFormat::Video { .. }) {
            return Err(RtspError::ConfigurationNotSupported(
                "the file source has no audio".to_string(),
            ));
        }
        Ok(Box::new(AnnexBFileSource::open(&self.path, self.fps)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_parameter_sets_with_the_next_picture() {
        let stream: Vec<u8> = vec![
            0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e, // SPS
            0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80, // PPS
            0, 0, 0, 1, 0x65, 0x88, 0x84, // IDR
            0, 0, 1, 0x41, 0x9a, 0x02, // P slice, 3-byte start code
        ];
        let (units, sets) = split_access_units(&stream);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], stream[..23].to_vec());
        assert_eq!(units[1], vec![0, 0, 0, 1, 0x41, 0x9a, 0x02]);
        let sets = sets.unwrap();
        assert_eq!(sets.sps, vec![0x67, 0x42, 0x00, 0x1e]);
        assert_eq!(sets.pps, vec![0x68, 0xce, 0x3c, 0x80]);
    }
}
