use super::Packetizer;
use crate::error::{Result, RtspError};
use crate::rtp::{MAX_PAYLOAD, PAYLOAD_TYPE, PacketSink, RTP_HEADER_LENGTH};

/// AU-headers-length (2 bytes) + one 16-bit AU header.
const AU_HEADER_SECTION: usize = 4;
/// Largest access unit the 13-bit AU-size field can describe.
const MAX_AU_SIZE: usize = (1 << 13) - 1;
/// MPEG-4 audio object type for AAC LC.
const AAC_LC: u16 = 2;
const CHANNELS: u16 = 1;

const SAMPLING_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Index of `rate` in the MPEG-4 sampling frequency table.
pub fn sampling_rate_index(rate: u32) -> Option<u8> {
    SAMPLING_RATES
        .iter()
        .position(|&r| r == rate)
        .map(|i| i as u8)
}

/// AAC RTP packetizer (RFC 3640, AAC-hbr mode).
///
/// Frames may arrive wrapped in ADTS; the ADTS header (7 bytes, 9 with
/// CRC) is stripped. Every packet starts with a one-entry AU header
/// section:
///
/// ```text
/// +--------+--------+--------+--------+
/// |  AU-headers-len = 16    | size:13 |idx:3|
/// +--------+--------+--------+--------+
/// ```
///
/// Access units larger than a packet are fragmented; each fragment repeats
/// the AU header with the full access unit size, and the marker bit is set
/// on the last one. Access units above 8191 bytes do not fit the size field
/// and are dropped.
#[derive(Debug)]
pub struct AacPacketizer {
    sampling_rate: u32,
    config: u16,
}

impl AacPacketizer {
    pub fn new(sampling_rate: u32) -> Result<Self> {
        let index = sampling_rate_index(sampling_rate).ok_or_else(|| {
            RtspError::ConfigurationNotSupported(format!(
                "AAC sampling rate {sampling_rate} Hz"
            ))
        })?;
        let config = (AAC_LC << 11) | (u16::from(index) << 7) | (CHANNELS << 3);
        Ok(Self {
            sampling_rate,
            config,
        })
    }

    /// AudioSpecificConfig as carried in the `config` fmtp parameter.
    pub fn config(&self) -> u16 {
        self.config
    }

    /// Strip an ADTS header if present.
    fn access_unit(frame: &[u8]) -> &[u8] {
        if frame.len() >= 7 && frame[0] == 0xff && frame[1] & 0xf0 == 0xf0 {
            let protection_absent = frame[1] & 0x01 == 1;
            let header = if protection_absent { 7 } else { 9 };
            let frame_length = ((usize::from(frame[3]) & 0x03) << 11)
                | (usize::from(frame[4]) << 3)
                | (usize::from(frame[5]) >> 5);
            let end = frame_length.clamp(header, frame.len());
            return frame.get(header..end).unwrap_or_default();
        }
        frame
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, frame: &[u8], capture_ns: u64, sink: &dyn PacketSink) -> Result<()> {
        let au = Self::access_unit(frame);
        if au.is_empty() {
            return Ok(());
        }

        let size = au.len();
        if size > MAX_AU_SIZE {
            tracing::warn!(size, max = MAX_AU_SIZE, "oversized AAC access unit dropped");
            return Ok(());
        }
        let max_chunk = MAX_PAYLOAD - AU_HEADER_SECTION;
        let count = size.div_ceil(max_chunk);
        for (index, chunk) in au.chunks(max_chunk).enumerate() {
            let mut buffer = sink.allocate_buffer()?;
            let out = buffer.payload_mut();
            out[0] = 0x00;
            out[1] = 0x10;
            out[2] = (size >> 5) as u8;
            out[3] = ((size & 0x1f) << 3) as u8;
            out[AU_HEADER_SECTION..AU_HEADER_SECTION + chunk.len()].copy_from_slice(chunk);
            sink.set_timestamp(&mut buffer, capture_ns);
            if index + 1 == count {
                buffer.mark_last();
            }
            sink.commit(buffer, RTP_HEADER_LENGTH + AU_HEADER_SECTION + chunk.len())?;
        }
        Ok(())
    }

    fn codec_name(&self) -> &'static str {
        "mpeg4-generic"
    }

    fn clock_rate(&self) -> u32 {
        self.sampling_rate
    }

    fn media_description(&self, port: u16) -> String {
        format!(
            "m=audio {port} RTP/AVP {pt}\r\n\
             a=rtpmap:{pt} {}/{}\r\n\
             a=fmtp:{pt} streamtype=5; profile-level-id=15; mode=AAC-hbr; config={:x}; \
             SizeLength=13; IndexLength=3; IndexDeltaLength=3;\r\n",
            self.codec_name(),
            self.sampling_rate,
            self.config,
            pt = PAYLOAD_TYPE,
        )
    }
}
