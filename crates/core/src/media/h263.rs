use super::Packetizer;
use crate::error::Result;
use crate::rtp::{MAX_PAYLOAD, PAYLOAD_TYPE, PacketSink, RTP_HEADER_LENGTH};

const PAYLOAD_HEADER_LENGTH: usize = 2;

/// H.263+ RTP packetizer (RFC 4629).
///
/// Each frame starts with a picture start code. Its two leading zero bytes
/// are dropped and the P bit of the 2-byte payload header is set on the
/// first packet instead (§5.1). Continuation packets carry an all-zero
/// header. The marker bit closes the frame.
#[derive(Debug, Default)]
pub struct H263Packetizer;

impl H263Packetizer {
    pub fn new() -> Self {
        Self
    }
}

impl Packetizer for H263Packetizer {
    fn packetize(&mut self, frame: &[u8], capture_ns: u64, sink: &dyn PacketSink) -> Result<()> {
        let picture_start = frame.starts_with(&[0, 0]);
        let data = if picture_start { &frame[2..] } else { frame };
        if data.is_empty() {
            return Ok(());
        }

        let max_chunk = MAX_PAYLOAD - PAYLOAD_HEADER_LENGTH;
        let count = data.len().div_ceil(max_chunk);
        for (index, chunk) in data.chunks(max_chunk).enumerate() {
            let mut buffer = sink.allocate_buffer()?;
            let out = buffer.payload_mut();
            out[0] = if index == 0 && picture_start { 0x04 } else { 0x00 };
            out[1] = 0;
            out[PAYLOAD_HEADER_LENGTH..PAYLOAD_HEADER_LENGTH + chunk.len()].copy_from_slice(chunk);
            sink.set_timestamp(&mut buffer, capture_ns);
            if index + 1 == count {
                buffer.mark_last();
            }
            sink.commit(buffer, RTP_HEADER_LENGTH + PAYLOAD_HEADER_LENGTH + chunk.len())?;
        }
        tracing::trace!(frame_bytes = frame.len(), rtp_packets = count, "H.263 frame packetized");
        Ok(())
    }

    fn codec_name(&self) -> &'static str {
        "H263-1998"
    }

    fn clock_rate(&self) -> u32 {
        90_000
    }

    fn media_description(&self, port: u16) -> String {
        format!(
            "m=video {port} RTP/AVP {pt}\r\na=rtpmap:{pt} {}/{}\r\n",
            self.codec_name(),
            self.clock_rate(),
            pt = PAYLOAD_TYPE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::testing::VecSink;

    #[test]
    fn picture_start_code_becomes_p_bit() {
        let sink = VecSink::new(90_000);
        let mut p = H263Packetizer::new();
        p.packetize(&[0x00, 0x00, 0x80, 0x02, 0x11], 1, &sink).unwrap();
        let packets = sink.take();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][12..], &[0x04u8, 0x00, 0x80, 0x02, 0x11][..]);
        assert_eq!(packets[0][1] & 0x80, 0x80);
    }

    #[test]
    fn large_frame_splits_with_plain_continuations() {
        let sink = VecSink::new(90_000);
        let mut p = H263Packetizer::new();
        let mut frame = vec![0x00, 0x00, 0x80];
        frame.extend(vec![0x55; MAX_PAYLOAD * 2]);
        p.packetize(&frame, 1, &sink).unwrap();
        let packets = sink.take();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0][12], 0x04);
        assert_eq!(packets[1][12], 0x00);
        assert_eq!(packets[1][1] & 0x80, 0);
        assert_eq!(packets[2][1] & 0x80, 0x80);
    }

    #[test]
    fn media_description() {
        let sdp = H263Packetizer::new().media_description(5006);
        assert_eq!(sdp, "m=video 5006 RTP/AVP 96\r\na=rtpmap:96 H263-1998/90000\r\n");
    }
}
