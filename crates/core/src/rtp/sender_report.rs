//! RTCP Sender Report generation (RFC 3550 §6.4.1).
//!
//! ```text
//!         0                   1                   2                   3
//!         0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//!        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! header |V=2|P|    RC   |   PT=SR=200   |             length            |
//!        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!        |                         SSRC of sender                        |
//!        +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! sender |              NTP timestamp, most significant word             |
//! info   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!        |             NTP timestamp, least significant word             |
//!        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!        |                         RTP timestamp                         |
//!        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!        |                     sender's packet count                     |
//!        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!        |                      sender's octet count                     |
//!        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! No report blocks are emitted: the sender never receives.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::RTP_HEADER_LENGTH;

/// Serialized size of a report without report blocks.
pub const SR_LENGTH: usize = 28;
/// Send activity between two reports.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(3);

const SR_PACKET_TYPE: u8 = 200;
/// Seconds between 1900-01-01 and 1970-01-01.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Current wallclock as a 64-bit NTP timestamp.
pub fn ntp_now() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs() + NTP_UNIX_OFFSET;
    let frac = (u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

/// Counters and timing for the periodic Sender Report of one stream.
#[derive(Debug)]
pub struct SenderReport {
    ssrc: u32,
    packet_count: u32,
    octet_count: u32,
    rtp_timestamp: u32,
    last_update: Option<Instant>,
    since_report: Duration,
    interval: Duration,
}

impl SenderReport {
    pub fn new(ssrc: u32) -> Self {
        Self::with_interval(ssrc, REPORT_INTERVAL)
    }

    pub fn with_interval(ssrc: u32, interval: Duration) -> Self {
        Self {
            ssrc,
            packet_count: 0,
            octet_count: 0,
            rtp_timestamp: 0,
            last_update: None,
            since_report: Duration::ZERO,
            interval,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::with_interval(self.ssrc, self.interval);
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn octet_count(&self) -> u32 {
        self.octet_count
    }

    /// Account for one sent packet of `length` bytes, header included.
    ///
    /// Returns a serialized report once [`REPORT_INTERVAL`] of send activity
    /// has accumulated since the previous one.
    pub fn update(&mut self, length: usize, now: Instant, rtp_timestamp: u32) -> Option<[u8; SR_LENGTH]> {
        self.packet_count = self.packet_count.wrapping_add(1);
        let payload = length.saturating_sub(RTP_HEADER_LENGTH) as u32;
        self.octet_count = self.octet_count.wrapping_add(payload);
        self.rtp_timestamp = rtp_timestamp;

        if let Some(last) = self.last_update {
            self.since_report += now.saturating_duration_since(last);
        }
        self.last_update = Some(now);

        if self.interval.is_zero() || self.since_report < self.interval {
            return None;
        }
        self.since_report = Duration::ZERO;
        Some(self.serialize(ntp_now()))
    }

    pub fn serialize(&self, ntp: u64) -> [u8; SR_LENGTH] {
        let mut buf = [0u8; SR_LENGTH];
        buf[0] = 0x80;
        buf[1] = SR_PACKET_TYPE;
        // length in 32-bit words minus one
        buf[2..4].copy_from_slice(&((SR_LENGTH / 4 - 1) as u16).to_be_bytes());
        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..16].copy_from_slice(&ntp.to_be_bytes());
        buf[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        buf[24..28].copy_from_slice(&self.octet_count.to_be_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let mut sr = SenderReport::new(0x1234_5678);
        let now = Instant::now();
        sr.update(112, now, 9000);
        sr.update(62, now, 12000);
        let buf = sr.serialize(0x0102_0304_0506_0708);

        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 200);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 6);
        assert_eq!(&buf[4..8], &0x1234_5678u32.to_be_bytes());
        assert_eq!(&buf[8..16], &0x0102_0304_0506_0708u64.to_be_bytes());
        assert_eq!(u32::from_be_bytes(buf[16..20].try_into().unwrap()), 12000);
        assert_eq!(u32::from_be_bytes(buf[20..24].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(buf[24..28].try_into().unwrap()), 150);
    }

    #[test]
    fn due_after_interval() {
        let mut sr = SenderReport::with_interval(1, Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(sr.update(100, t0, 0).is_none());
        assert!(sr.update(100, t0 + Duration::from_millis(50), 0).is_none());
        assert!(sr.update(100, t0 + Duration::from_millis(100), 0).is_some());
        // timer restarts after a report
        assert!(sr.update(100, t0 + Duration::from_millis(150), 0).is_none());
    }

    #[test]
    fn reset_zeroes_counters() {
        let mut sr = SenderReport::new(7);
        sr.update(500, Instant::now(), 1);
        sr.reset();
        assert_eq!(sr.packet_count(), 0);
        assert_eq!(sr.octet_count(), 0);
    }

    #[test]
    fn ntp_is_after_1900_offset() {
        assert!(ntp_now() >> 32 > NTP_UNIX_OFFSET);
    }
}
