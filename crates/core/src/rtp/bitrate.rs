//! Sliding-window bitrate estimate.

use std::time::Instant;

/// Minimum time folded into one bucket, in milliseconds.
const RESOLUTION_MS: u64 = 200;
/// Span covered by all buckets together, in milliseconds.
const WINDOW_MS: u64 = 5000;

/// Decaying average of the committed byte rate.
///
/// Bytes are accumulated until more than [`RESOLUTION_MS`] has elapsed,
/// then stored as one `(bytes, elapsed)` bucket in a ring of
/// `WINDOW_MS / RESOLUTION_MS` buckets. The very first push only anchors
/// the clock.
#[derive(Debug)]
pub struct AverageBitrate {
    sums: Vec<u64>,
    elapsed: Vec<u64>,
    index: usize,
    pending_bytes: u64,
    pending_ms: u64,
    last: Option<Instant>,
}

impl Default for AverageBitrate {
    fn default() -> Self {
        Self::new()
    }
}

impl AverageBitrate {
    pub fn new() -> Self {
        let size = (WINDOW_MS / RESOLUTION_MS) as usize;
        Self {
            sums: vec![0; size],
            elapsed: vec![0; size],
            index: 0,
            pending_bytes: 0,
            pending_ms: 0,
            last: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn push(&mut self, length: usize) {
        self.push_at(length, Instant::now());
    }

    pub fn push_at(&mut self, length: usize, now: Instant) {
        if let Some(last) = self.last {
            self.pending_ms += now.saturating_duration_since(last).as_millis() as u64;
            self.pending_bytes += length as u64;
            if self.pending_ms > RESOLUTION_MS {
                self.sums[self.index] = self.pending_bytes;
                self.elapsed[self.index] = self.pending_ms;
                self.pending_bytes = 0;
                self.pending_ms = 0;
                self.index = (self.index + 1) % self.sums.len();
            }
        }
        self.last = Some(now);
    }

    /// Bits per second over the filled buckets, 0 before any bucket closes.
    pub fn average(&self) -> u64 {
        let sum: u64 = self.sums.iter().sum();
        let delta: u64 = self.elapsed.iter().sum();
        if delta > 0 { 8000 * sum / delta } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_before_data() {
        assert_eq!(AverageBitrate::new().average(), 0);
    }

    #[test]
    fn first_push_only_anchors() {
        let mut avg = AverageBitrate::new();
        let t0 = Instant::now();
        avg.push_at(10_000, t0);
        avg.push_at(10_000, t0 + Duration::from_millis(300));
        // only the second push is counted: 10000 bytes over 300ms
        assert_eq!(avg.average(), 8000 * 10_000 / 300);
    }

    #[test]
    fn converges_to_constant_rate() {
        let mut avg = AverageBitrate::new();
        let t0 = Instant::now();
        // 1000 bytes every 10ms = 800 kbit/s
        for i in 0..=600u64 {
            avg.push_at(1000, t0 + Duration::from_millis(i * 10));
        }
        let rate = avg.average();
        let expected = 800_000u64;
        assert!(
            rate.abs_diff(expected) < expected / 20,
            "rate {rate} too far from {expected}"
        );
    }

    #[test]
    fn reset_clears_window() {
        let mut avg = AverageBitrate::new();
        let t0 = Instant::now();
        avg.push_at(1000, t0);
        avg.push_at(1000, t0 + Duration::from_millis(250));
        assert!(avg.average() > 0);
        avg.reset();
        assert_eq!(avg.average(), 0);
    }
}
