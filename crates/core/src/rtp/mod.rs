//! RTP packet layout and the paced sender.
//!
//! Every outgoing packet is a pre-allocated MTU-sized buffer whose fixed
//! header (RFC 3550 §5.1) is stamped once and patched per packet:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Byte 0 is always `0x80` (version 2, no padding, no extension, no CSRC)
//! and the payload type is always 96. Packetizers write their payload
//! behind the header and hand the buffer to a [`PacketSink`], normally a
//! [`PacketPacer`].

pub mod bitrate;
pub mod pacer;
pub mod sender_report;
pub mod stats;

pub use pacer::{PacerConfig, PacketPacer};

use crate::error::Result;

/// Size of the fixed RTP header.
pub const RTP_HEADER_LENGTH: usize = 12;
/// Upper bound for a whole RTP packet, header included.
pub const MTU: usize = 1300;
/// Room left for payload behind the fixed header.
pub const MAX_PAYLOAD: usize = MTU - RTP_HEADER_LENGTH;
/// Dynamic payload type used for every track.
pub const PAYLOAD_TYPE: u8 = 96;
/// Number of buffers in a pacer's ring.
pub const RING_CAPACITY: usize = 300;

/// Convert a capture time in nanoseconds to an RTP timestamp.
///
/// The arithmetic is `((ns / 100) * (clock / 1000)) / 10000` in integer
/// steps, so clocks that are not a multiple of 1 kHz lose their remainder.
/// Receivers that compare against other senders rely on these exact values.
pub fn rtp_timestamp(capture_ns: u64, clock_rate: u32) -> u32 {
    ((capture_ns / 100).wrapping_mul(u64::from(clock_rate / 1000)) / 10_000) as u32
}

/// One slot of the packet ring.
///
/// Handed out by [`PacketSink::allocate_buffer`] with the header
/// pre-stamped and the marker bit cleared, and returned through
/// [`PacketSink::commit`].
#[derive(Debug)]
pub struct PacketBuffer {
    data: Box<[u8]>,
    len: usize,
    capture_ns: u64,
    pub(crate) epoch: u64,
}

impl PacketBuffer {
    pub(crate) fn new(epoch: u64) -> Self {
        let mut data = vec![0u8; MTU].into_boxed_slice();
        data[0] = 0x80;
        data[1] = PAYLOAD_TYPE;
        Self {
            data,
            len: 0,
            capture_ns: 0,
            epoch,
        }
    }

    /// A buffer that belongs to no ring, for sinks that just collect packets.
    pub fn detached() -> Self {
        Self::new(0)
    }

    /// Clear the per-packet state before the slot is reused.
    pub(crate) fn recycle(&mut self) {
        self.data[1] = PAYLOAD_TYPE;
        self.len = 0;
        self.capture_ns = 0;
    }

    /// Writable area behind the fixed header.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[RTP_HEADER_LENGTH..]
    }

    /// Set the marker bit: this packet ends a frame.
    pub fn mark_last(&mut self) {
        self.data[1] |= 0x80;
    }

    pub fn marker(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    /// Capture time the timestamp was derived from.
    pub fn capture_ns(&self) -> u64 {
        self.capture_ns
    }

    /// Committed length, header included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The committed packet as it goes on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub(crate) fn stamp_timestamp(&mut self, capture_ns: u64, clock_rate: u32) {
        self.capture_ns = capture_ns;
        let ts = rtp_timestamp(capture_ns, clock_rate);
        self.data[4..8].copy_from_slice(&ts.to_be_bytes());
    }

    pub(crate) fn stamp_sequence(&mut self, seq: u16) {
        self.data[2..4].copy_from_slice(&seq.to_be_bytes());
    }

    pub(crate) fn stamp_ssrc(&mut self, ssrc: u32) {
        self.data[8..12].copy_from_slice(&ssrc.to_be_bytes());
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.clamp(RTP_HEADER_LENGTH, MTU);
    }
}

/// Where packetizers put their packets.
pub trait PacketSink: Send + Sync {
    /// Wait for a free buffer. Fails with
    /// [`Interrupted`](crate::RtspError::Interrupted) when the ring is reset
    /// while waiting.
    fn allocate_buffer(&self) -> Result<PacketBuffer>;

    /// Write the RTP timestamp for `capture_ns` into `buffer`, keeping the
    /// raw capture time for pacing.
    fn set_timestamp(&self, buffer: &mut PacketBuffer, capture_ns: u64);

    /// Hand a filled buffer of `length` bytes (header included) to the
    /// send side.
    fn commit(&self, buffer: PacketBuffer, length: usize) -> Result<()>;

    /// RTP clock of the stream in Hz.
    fn clock_rate(&self) -> u32;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_prestamped() {
        let buf = PacketBuffer::detached();
        assert_eq!(buf.data[0], 0x80);
        assert_eq!(buf.data[1], 96);
        assert!(!buf.marker());
    }

    #[test]
    fn marker_is_cleared_on_recycle() {
        let mut buf = PacketBuffer::detached();
        buf.mark_last();
        assert_eq!(buf.data[1], 0x80 | 96);
        buf.recycle();
        assert!(!buf.marker());
        assert_eq!(buf.data[1] & 0x7f, 96);
    }

    #[test]
    fn timestamp_arithmetic_is_stepwise() {
        // one second at 90 kHz
        assert_eq!(rtp_timestamp(1_000_000_000, 90_000), 90_000);
        // 8 kHz audio
        assert_eq!(rtp_timestamp(20_000_000, 8_000), 160);
        // 44.1 kHz truncates to 44 before scaling
        assert_eq!(rtp_timestamp(1_000_000_000, 44_100), 44_000);
        // sub-100ns remainder is discarded
        assert_eq!(rtp_timestamp(99, 90_000), 0);
    }

    #[test]
    fn header_fields_round_trip_through_buffer() {
        let mut buf = PacketBuffer::detached();
        buf.stamp_sequence(0xBEEF);
        buf.stamp_ssrc(0xAABBCCDD);
        buf.stamp_timestamp(2_000_000_000, 90_000);
        buf.set_len(RTP_HEADER_LENGTH + 4);
        assert_eq!(buf.sequence(), 0xBEEF);
        assert_eq!(buf.ssrc(), 0xAABBCCDD);
        assert_eq!(buf.timestamp(), 180_000);
        assert_eq!(buf.capture_ns(), 2_000_000_000);
        assert_eq!(buf.as_bytes().len(), 16);
    }

    #[test]
    fn length_is_bounded_by_mtu() {
        let mut buf = PacketBuffer::detached();
        buf.set_len(MTU + 50);
        assert_eq!(buf.len(), MTU);
        assert_eq!(buf.payload_mut().len(), MAX_PAYLOAD);
    }
}
