//! Inter-packet delay smoothing for the pacing loop.

use std::time::Instant;

/// Samples ignored before the moving average kicks in.
pub const WARMUP_SAMPLES: u32 = 40;
/// Calibration bias subtracted from the smoothed delay.
const BIAS_NS: i64 = 2_000_000;

/// Estimates the real delay between two generated packets.
///
/// The first [`WARMUP_SAMPLES`] samples simply replace the estimate. After
/// that the estimate is a moving average over at most `count` samples.
/// Every `period` worth of pushed media time the sum of pushed deltas is
/// compared against the wall clock and the difference is folded into the
/// current sample, so a sender that falls behind catches up.
#[derive(Debug)]
pub struct Statistics {
    count: f32,
    samples: u32,
    mean: f32,
    weight: f32,
    elapsed: i64,
    duration: i64,
    period: i64,
    start: Option<Instant>,
}

impl Statistics {
    /// `count` bounds the averaging window, `period_ms` the drift check.
    pub fn new(count: u32, period_ms: u64) -> Self {
        Self {
            count: count as f32,
            samples: 0,
            mean: 0.0,
            weight: 0.0,
            elapsed: 0,
            duration: 0,
            period: period_ms as i64 * 1_000_000,
            start: None,
        }
    }

    pub fn push(&mut self, delta_ns: i64) {
        self.push_at(delta_ns, Instant::now());
    }

    pub fn push_at(&mut self, delta_ns: i64, now: Instant) {
        let mut value = delta_ns;
        self.duration += delta_ns;
        self.elapsed += delta_ns;
        if self.elapsed > self.period {
            self.elapsed = 0;
            let start = match self.start {
                Some(start) => start,
                None => {
                    self.duration = 0;
                    *self.start.insert(now)
                }
            };
            let wall = now.saturating_duration_since(start).as_nanos() as i64;
            value -= wall - self.duration;
        }

        if self.samples < WARMUP_SAMPLES {
            self.samples += 1;
            self.mean = value as f32;
        } else {
            self.mean = (self.mean * self.weight + value as f32) / (self.weight + 1.0);
            if self.weight < self.count {
                self.weight += 1.0;
            }
        }
    }

    /// Smoothed delay minus the calibration bias, never negative.
    pub fn average(&self) -> u64 {
        let ns = self.mean as i64 - BIAS_NS;
        ns.max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MS: i64 = 1_000_000;

    #[test]
    fn empty_is_zero() {
        assert_eq!(Statistics::new(50, 3000).average(), 0);
    }

    #[test]
    fn warmup_tracks_last_sample() {
        let mut stats = Statistics::new(50, 3000);
        let now = Instant::now();
        stats.push_at(10 * MS, now);
        stats.push_at(30 * MS, now);
        assert_eq!(stats.average(), (28 * MS) as u64);
    }

    #[test]
    fn smooths_after_warmup() {
        let mut stats = Statistics::new(50, 60_000);
        let now = Instant::now();
        for _ in 0..WARMUP_SAMPLES {
            stats.push_at(40 * MS, now);
        }
        // first post-warmup sample has zero weight and replaces the mean
        stats.push_at(40 * MS, now);
        stats.push_at(80 * MS, now);
        // (40 + 80) / 2 - 2
        assert_eq!(stats.average(), (58 * MS) as u64);
    }

    #[test]
    fn bias_floors_at_zero() {
        let mut stats = Statistics::new(50, 3000);
        stats.push_at(MS, Instant::now());
        assert_eq!(stats.average(), 0);
    }

    #[test]
    fn drift_check_folds_wall_clock_lag() {
        let mut stats = Statistics::new(50, 100);
        let start = Instant::now();
        // crossing the period for the first time anchors the wall clock
        stats.push_at(150 * MS, start);
        assert_eq!(stats.average(), (148 * MS) as u64);

        // 150ms of media pushed, but 250ms of wall time went by
        let later = start + Duration::from_millis(250);
        stats.push_at(150 * MS, later);
        // 150 - (250 - 150) - 2
        assert_eq!(stats.average(), (48 * MS) as u64);
    }
}
