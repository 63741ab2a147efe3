use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::{Packetizer, ParameterSets};
use crate::error::Result;
use crate::rtp::{MAX_PAYLOAD, PAYLOAD_TYPE, PacketSink, RTP_HEADER_LENGTH};

/// FU indicator + FU header.
const FU_HEADER_LENGTH: usize = 2;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;

/// H.264 RTP packetizer (RFC 6184).
///
/// Converts H.264 Annex B access units into RTP packets using
/// packetization mode 1:
///
/// - **Single NAL Unit** (§5.6): NALs that fit in one packet are sent
///   as-is behind the RTP header.
///
/// - **FU-A Fragmentation** (§5.8): larger NALs are split across packets,
///   each fragment prefixed with a 2-byte FU header:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 14 bytes)
///   ```
///
/// ## Annex B NAL extraction
///
/// NAL units are delimited by 4-byte (`00 00 00 01`) or 3-byte
/// (`00 00 01`) start codes; [`extract_nal_units`](Self::extract_nal_units)
/// handles both and tracks each start code's length.
///
/// ## SDP (RFC 6184 §8.1)
///
/// `profile-level-id` and `sprop-parameter-sets` come from the parameter
/// sets handed over at configure time, or are captured from the first
/// access unit that carries SPS/PPS.
///
/// ## Marker bit
///
/// Set on the last packet of each access unit (RFC 6184 §5.1).
#[derive(Debug, Default)]
pub struct H264Packetizer {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive profile-level-id from SPS NAL (RFC 6184 §8.1): bytes 1–3 are profile_idc, constraint_set, level_idc.
    fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// Packetize a single NAL unit into one or more RTP packets.
    ///
    /// Returns the number of packets committed.
    fn packetize_nal(
        &mut self,
        nal_unit: &[u8],
        is_last_nal: bool,
        capture_ns: u64,
        sink: &dyn PacketSink,
    ) -> Result<usize> {
        if nal_unit.is_empty() {
            return Ok(0);
        }

        if nal_unit.len() <= MAX_PAYLOAD {
            // Single NAL Unit mode (RFC 6184 §5.6)
            let mut buffer = sink.allocate_buffer()?;
            buffer.payload_mut()[..nal_unit.len()].copy_from_slice(nal_unit);
            sink.set_timestamp(&mut buffer, capture_ns);
            if is_last_nal {
                buffer.mark_last();
            }
            sink.commit(buffer, RTP_HEADER_LENGTH + nal_unit.len())?;
            return Ok(1);
        }

        // FU-A fragmentation (RFC 6184 §5.8)
        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0x60) | NAL_TYPE_FU_A;
        let payload = &nal_unit[1..];
        let max_fragment = MAX_PAYLOAD - FU_HEADER_LENGTH;

        let mut fragments = 0usize;
        for (index, chunk) in payload.chunks(max_fragment).enumerate() {
            let last_fragment = (index + 1) * max_fragment >= payload.len();
            let start_bit = if index == 0 { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };

            let mut buffer = sink.allocate_buffer()?;
            let out = buffer.payload_mut();
            out[0] = fu_indicator;
            out[1] = start_bit | end_bit | nal_type;
            out[FU_HEADER_LENGTH..FU_HEADER_LENGTH + chunk.len()].copy_from_slice(chunk);
            sink.set_timestamp(&mut buffer, capture_ns);
            if is_last_nal && last_fragment {
                buffer.mark_last();
            }
            sink.commit(buffer, RTP_HEADER_LENGTH + FU_HEADER_LENGTH + chunk.len())?;
            fragments += 1;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments,
            "FU-A fragmented NAL unit"
        );
        Ok(fragments)
    }

    /// Extract NAL units from an H.264 Annex B bitstream.
    ///
    /// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
    /// `00 00 01`) and returns the NAL data between them, excluding
    /// the start codes themselves.
    pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
        let mut nal_units = Vec::new();
        let mut i = 0usize;

        // (nal_data_start_index, start_code_length)
        let mut start_entries: Vec<(usize, usize)> = Vec::new();

        while i < data.len() {
            if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
                start_entries.push((i + 4, 4));
                i += 4;
            } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
                start_entries.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        for (idx, &(start, _)) in start_entries.iter().enumerate() {
            let end = match start_entries.get(idx + 1) {
                Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
                None => data.len(),
            };
            if start < end {
                nal_units.push(&data[start..end]);
            }
        }

        nal_units
    }

    fn capture_parameter_sets(&mut self, nal_units: &[&[u8]]) {
        for nal in nal_units {
            let Some(&header) = nal.first() else {
                continue;
            };
            match header & 0x1f {
                NAL_TYPE_SPS if self.sps.is_none() => {
                    self.sps = Some(nal.to_vec());
                    tracing::debug!("H.264 SPS captured from bitstream ({} bytes)", nal.len());
                }
                NAL_TYPE_PPS if self.pps.is_none() => {
                    self.pps = Some(nal.to_vec());
                    tracing::debug!("H.264 PPS captured from bitstream ({} bytes)", nal.len());
                }
                _ => {}
            }
        }
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, frame: &[u8], capture_ns: u64, sink: &dyn PacketSink) -> Result<()> {
        let nal_units = Self::extract_nal_units(frame);

        if self.sps.is_none() || self.pps.is_none() {
            self.capture_parameter_sets(&nal_units);
        }

        let mut packets = 0usize;
        for (i, nal) in nal_units.iter().enumerate() {
            let is_last = i + 1 == nal_units.len();
            packets += self.packetize_nal(nal, is_last, capture_ns, sink)?;
        }

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets,
            frame_bytes = frame.len(),
            capture_ns,
            "frame packetized"
        );
        Ok(())
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        90_000
    }

    /// `a=rtpmap` must precede the `a=fmtp` line that references it.
    fn media_description(&self, port: u16) -> String {
        let mut fmtp = String::from("packetization-mode=1;");
        if let Some(profile) = self.profile_level_id() {
            fmtp.push_str(&format!("profile-level-id={profile};"));
        }
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!("sprop-parameter-sets={sprop};"));
        }
        format!(
            "m=video {port} RTP/AVP {pt}\r\n\
             a=rtpmap:{pt} {name}/{clock}\r\n\
             a=fmtp:{pt} {fmtp}\r\n",
            pt = PAYLOAD_TYPE,
            name = self.codec_name(),
            clock = self.clock_rate(),
        )
    }

    fn set_parameter_sets(&mut self, sets: &ParameterSets) {
        self.sps = Some(sets.sps.clone());
        self.pps = Some(sets.pps.clone());
    }
}
