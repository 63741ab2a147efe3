use super::Packetizer;
use crate::error::Result;
use crate::rtp::{PAYLOAD_TYPE, PacketSink, RTP_HEADER_LENGTH};

/// Magic at the start of an AMR storage file (RFC 4867 §5).
const FILE_MAGIC: &[u8] = b"#!AMR\n";
/// Speech bits per frame type 0..=7, SID for type 8.
const FRAME_BITS: [usize; 9] = [95, 103, 118, 134, 148, 159, 204, 244, 39];
/// Every AMR frame covers 20 ms.
const FRAME_DURATION_NS: u64 = 20_000_000;
/// CMR 15: no mode request.
const NO_MODE_REQUEST: u8 = 0xf0;

/// AMR-NB RTP packetizer (RFC 4867, octet-aligned mode).
///
/// Input is one or more frames in storage format, a header byte
/// `0|FT|Q|00` followed by the speech bits. Each frame goes out in its
/// own packet as `CMR | TOC | speech`, where the storage header doubles as
/// the TOC entry with F=0. Frames after the first are stamped 20 ms apart.
#[derive(Debug, Default)]
pub struct AmrPacketizer;

impl AmrPacketizer {
    pub fn new() -> Self {
        Self
    }

    /// Length of the speech data following a storage header, `None` for
    /// NO_DATA and reserved types.
    fn speech_length(header: u8) -> Option<usize> {
        let frame_type = usize::from((header >> 3) & 0x0f);
        FRAME_BITS.get(frame_type).map(|bits| bits.div_ceil(8))
    }
}

impl Packetizer for AmrPacketizer {
    fn packetize(&mut self, frame: &[u8], capture_ns: u64, sink: &dyn PacketSink) -> Result<()> {
        let mut data = frame.strip_prefix(FILE_MAGIC).unwrap_or(frame);
        let mut index = 0u64;
        while let Some((&header, rest)) = data.split_first() {
            let Some(length) = Self::speech_length(header) else {
                data = rest;
                continue;
            };
            let Some(speech) = rest.get(..length) else {
                tracing::warn!(
                    needed = length,
                    available = rest.len(),
                    "truncated AMR frame dropped"
                );
                break;
            };

            let mut buffer = sink.allocate_buffer()?;
            let out = buffer.payload_mut();
            out[0] = NO_MODE_REQUEST;
            out[1] = header & 0x7c;
            out[2..2 + length].copy_from_slice(speech);
            sink.set_timestamp(&mut buffer, capture_ns + index * FRAME_DURATION_NS);
            buffer.mark_last();
            sink.commit(buffer, RTP_HEADER_LENGTH + 2 + length)?;

            data = &rest[length..];
            index += 1;
        }
        Ok(())
    }

    fn codec_name(&self) -> &'static str {
        "AMR"
    }

    fn clock_rate(&self) -> u32 {
        8_000
    }

    fn media_description(&self, port: u16) -> String {
        format!(
            "m=audio {port} RTP/AVP {pt}\r\na=rtpmap:{pt} {}/{}\r\na=fmtp:{pt} octet-align=1;\r\n",
            self.codec_name(),
            self.clock_rate(),
            pt = PAYLOAD_TYPE,
        )
    }
}
