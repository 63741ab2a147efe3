//! Paced RTP sender.
//!
//! [`PacketPacer`] sits between a packetizer and the network. Producers
//! fill buffers from a fixed ring and commit them; a dedicated thread sends
//! them at the rate implied by their capture timestamps.
//!
//! ```text
//!  producer                 ring (300 slots)              pacing thread
//!  allocate_buffer()  <---  free  <------------------------  release
//!  commit()           --->  committed  ------------------->  sleep, send
//! ```
//!
//! The ring is the only structure shared between the two sides. A full
//! ring blocks the producer. Resetting the ring bumps its epoch, which
//! wakes and fails any producer still holding or waiting for a slot.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::bitrate::AverageBitrate;
use super::sender_report::SenderReport;
use super::stats::Statistics;
use super::{PacketBuffer, PacketSink, RING_CAPACITY};
use crate::error::{Result, RtspError};
use crate::transport::{Destination, UdpTransport};

/// Packets at the start of a stream that only feed the statistics.
pub const DROPPED_PACKETS: u32 = 30;
/// How long the pacing thread waits for a packet before looping back.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(4);
/// Accumulated timestamp drift that restarts drift tracking.
const DRIFT_RESET_NS: i64 = 500_000_000;
const STATS_WINDOW: u32 = 50;
const STATS_PERIOD_MS: u64 = 3000;

/// Tuning for a [`PacketPacer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerConfig {
    /// Time the pacing thread buffers before sending the first packet. When
    /// zero, packets go out as soon as they are committed.
    pub jitter_buffer: Duration,
}

struct Ring {
    free: Vec<PacketBuffer>,
    committed: VecDeque<PacketBuffer>,
    epoch: u64,
    seq: u16,
    shutdown: bool,
}

impl Ring {
    fn new() -> Self {
        let mut ring = Self {
            free: Vec::new(),
            committed: VecDeque::new(),
            epoch: 0,
            seq: 0,
            shutdown: false,
        };
        ring.refill();
        ring
    }

    /// Discard in-flight slots and start a new epoch. The sequence counter
    /// carries over.
    fn refill(&mut self) {
        self.epoch += 1;
        self.committed.clear();
        self.free = (0..RING_CAPACITY)
            .map(|_| PacketBuffer::new(self.epoch))
            .collect();
    }
}

enum Next {
    Packet(PacketBuffer),
    Idle,
    Stop,
}

struct Shared {
    ring: Mutex<Ring>,
    freed: Condvar,
    committed: Condvar,
    ssrc: u32,
    clock_rate: u32,
    jitter_buffer: Duration,
    transport: RwLock<Option<UdpTransport>>,
    destination: RwLock<Option<Destination>>,
    report: Mutex<SenderReport>,
    bitrate: Mutex<AverageBitrate>,
}

/// Ring of RTP buffers plus the thread that paces them onto the network.
///
/// The pacing thread starts on the first commit and lives until
/// [`reset`](Self::reset) or [`close`](Self::close), or until a send fails.
/// A failed send resets the ring and ends the thread; the next commit of a
/// fresh buffer starts a new one.
pub struct PacketPacer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PacketPacer {
    /// Bind a fresh RTP/RTCP socket pair and pick a random SSRC.
    pub fn new(clock_rate: u32, config: PacerConfig) -> Result<Self> {
        let transport = UdpTransport::bind()?;
        let ssrc = rand::random::<u32>();
        tracing::debug!(
            clock_rate,
            ssrc = format_args!("{:#010X}", ssrc),
            jitter_buffer_ms = config.jitter_buffer.as_millis() as u64,
            "RTP pacer created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                ring: Mutex::new(Ring::new()),
                freed: Condvar::new(),
                committed: Condvar::new(),
                ssrc,
                clock_rate,
                jitter_buffer: config.jitter_buffer,
                transport: RwLock::new(Some(transport)),
                destination: RwLock::new(None),
                report: Mutex::new(SenderReport::new(ssrc)),
                bitrate: Mutex::new(AverageBitrate::new()),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.shared.ssrc
    }

    /// Local `(rtp, rtcp)` ports, `None` once closed.
    pub fn local_ports(&self) -> Option<(u16, u16)> {
        self.shared
            .transport
            .read()
            .as_ref()
            .and_then(|t| t.local_ports().ok())
    }

    pub fn set_destination(&self, address: IpAddr, rtp_port: u16, rtcp_port: u16) {
        *self.shared.destination.write() = Some(Destination {
            address,
            rtp_port,
            rtcp_port,
        });
    }

    pub fn destination(&self) -> Option<Destination> {
        *self.shared.destination.read()
    }

    pub fn set_time_to_live(&self, ttl: u32) -> Result<()> {
        match self.shared.transport.read().as_ref() {
            Some(transport) => transport.set_ttl(ttl),
            None => Err(closed()),
        }
    }

    /// Decaying average of the committed bitrate, in bits per second.
    pub fn bitrate(&self) -> u64 {
        self.shared.bitrate.lock().average()
    }

    /// Packets counted by the sender report since the last reset.
    pub fn packets_sent(&self) -> u32 {
        self.shared.report.lock().packet_count()
    }

    /// Payload octets counted by the sender report since the last reset.
    pub fn octets_sent(&self) -> u32 {
        self.shared.report.lock().octet_count()
    }

    /// Whether the pacing thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the pacing thread and return the ring to its initial state.
    ///
    /// Producers blocked in [`allocate_buffer`](PacketSink::allocate_buffer)
    /// wake up with [`RtspError::Interrupted`]. Returns once the pacing
    /// thread has exited. Sequence number and SSRC are kept; the bitrate
    /// and sender report counters start over.
    pub fn reset(&self) {
        let mut worker = self.worker.lock();
        self.shared.ring.lock().shutdown = true;
        self.shared.freed.notify_all();
        self.shared.committed.notify_all();

        if let Some(handle) = worker.take()
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }

        {
            let mut ring = self.shared.ring.lock();
            ring.refill();
            ring.shutdown = false;
        }
        self.shared.report.lock().reset();
        self.shared.bitrate.lock().reset();
        self.shared.freed.notify_all();
        tracing::debug!(
            ssrc = format_args!("{:#010X}", self.shared.ssrc),
            "RTP pacer reset"
        );
    }

    /// Stop the pacing thread, reset the ring and release the sockets.
    pub fn close(&self) {
        self.reset();
        self.shared.transport.write().take();
    }

    fn ensure_running(&self, epoch: u64) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        // a reset ran between our commit and here; the packet is gone
        if self.shared.ring.lock().epoch != epoch {
            return Ok(());
        }
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("rtp-pacer".to_string())
            .spawn(move || shared.run(epoch))?;
        *worker = Some(handle);
        Ok(())
    }
}

impl PacketSink for PacketPacer {
    fn allocate_buffer(&self) -> Result<PacketBuffer> {
        let mut ring = self.shared.ring.lock();
        let epoch = ring.epoch;
        loop {
            if ring.shutdown || ring.epoch != epoch {
                return Err(RtspError::Interrupted);
            }
            if let Some(buffer) = ring.free.pop() {
                return Ok(buffer);
            }
            self.shared.freed.wait(&mut ring);
        }
    }

    fn set_timestamp(&self, buffer: &mut PacketBuffer, capture_ns: u64) {
        buffer.stamp_timestamp(capture_ns, self.shared.clock_rate);
    }

    fn commit(&self, mut buffer: PacketBuffer, length: usize) -> Result<()> {
        let epoch = buffer.epoch;
        {
            let mut ring = self.shared.ring.lock();
            if ring.shutdown || ring.epoch != epoch {
                return Err(RtspError::Interrupted);
            }
            ring.seq = ring.seq.wrapping_add(1);
            buffer.stamp_sequence(ring.seq);
            buffer.stamp_ssrc(self.shared.ssrc);
            buffer.set_len(length);
            ring.committed.push_back(buffer);
        }
        self.shared.committed.notify_one();
        self.shared.bitrate.lock().push(length);
        self.ensure_running(epoch)
    }

    fn clock_rate(&self) -> u32 {
        self.shared.clock_rate
    }
}

impl Drop for PacketPacer {
    fn drop(&mut self) {
        self.shared.ring.lock().shutdown = true;
        self.shared.freed.notify_all();
        self.shared.committed.notify_all();
        if let Some(handle) = self.worker.get_mut().take() {
            let _ = handle.join();
        }
    }
}

impl Shared {
    fn run(&self, epoch: u64) {
        tracing::debug!(ssrc = format_args!("{:#010X}", self.ssrc), "pacing thread started");
        let mut pacing = Pacing::new(!self.jitter_buffer.is_zero());
        let mut handled: u32 = 0;

        if !self.pause(self.jitter_buffer, epoch) {
            return;
        }

        loop {
            let buffer = match self.next_committed(epoch) {
                Next::Packet(buffer) => buffer,
                Next::Idle => continue,
                Next::Stop => break,
            };

            let delay = pacing.advance(buffer.capture_ns());
            if !delay.is_zero() && !self.pause(delay, epoch) {
                break;
            }

            let result = self.send(&buffer, handled > DROPPED_PACKETS);
            handled = handled.saturating_add(1);
            self.release(buffer, epoch);

            if let Err(e) = result {
                tracing::error!(
                    ssrc = format_args!("{:#010X}", self.ssrc),
                    error = %e,
                    "RTP send failed, pacing stopped"
                );
                self.fail(epoch);
                break;
            }
        }
        tracing::debug!(ssrc = format_args!("{:#010X}", self.ssrc), "pacing thread exited");
    }

    /// Update the sender report for `buffer` and put it on the wire.
    fn send(&self, buffer: &PacketBuffer, transmit: bool) -> Result<()> {
        let report = self
            .report
            .lock()
            .update(buffer.len(), Instant::now(), buffer.timestamp());
        if !transmit {
            return Ok(());
        }

        let destination = (*self.destination.read()).ok_or(RtspError::NoDestination)?;
        let transport = self.transport.read();
        let transport = transport.as_ref().ok_or_else(closed)?;
        transport.send_rtp(buffer.as_bytes(), destination.rtp())?;
        tracing::trace!(
            seq = buffer.sequence(),
            ts = buffer.timestamp(),
            len = buffer.len(),
            "RTP packet sent"
        );
        if let Some(report) = report {
            transport.send_rtcp(&report, destination.rtcp())?;
            tracing::trace!(ssrc = format_args!("{:#010X}", self.ssrc), "sender report sent");
        }
        Ok(())
    }

    fn next_committed(&self, epoch: u64) -> Next {
        let mut ring = self.ring.lock();
        loop {
            if ring.shutdown || ring.epoch != epoch {
                return Next::Stop;
            }
            if let Some(buffer) = ring.committed.pop_front() {
                return Next::Packet(buffer);
            }
            if self.committed.wait_for(&mut ring, IDLE_TIMEOUT).timed_out() {
                return Next::Idle;
            }
        }
    }

    /// Sleep for `duration` unless the ring is reset first. Returns whether
    /// the thread should keep going.
    fn pause(&self, duration: Duration, epoch: u64) -> bool {
        let deadline = Instant::now() + duration;
        let mut ring = self.ring.lock();
        while !ring.shutdown && ring.epoch == epoch {
            if self.committed.wait_until(&mut ring, deadline).timed_out() {
                break;
            }
        }
        !ring.shutdown && ring.epoch == epoch
    }

    fn release(&self, mut buffer: PacketBuffer, epoch: u64) {
        let mut ring = self.ring.lock();
        if ring.epoch != epoch {
            return;
        }
        buffer.recycle();
        ring.free.push(buffer);
        drop(ring);
        self.freed.notify_one();
    }

    /// Reset from inside the pacing thread after a send failure.
    fn fail(&self, epoch: u64) {
        {
            let mut ring = self.ring.lock();
            if ring.epoch != epoch {
                return;
            }
            ring.refill();
        }
        self.report.lock().reset();
        self.bitrate.lock().reset();
        self.freed.notify_all();
    }
}

/// Inter-packet timing of one pacing thread.
struct Pacing {
    stats: Statistics,
    previous_ns: u64,
    drift: i64,
    sleep: bool,
}

impl Pacing {
    /// `sleep`: whether packets are spread out by the smoothed delay or sent
    /// as soon as they arrive.
    fn new(sleep: bool) -> Self {
        Self {
            stats: Statistics::new(STATS_WINDOW, STATS_PERIOD_MS),
            previous_ns: 0,
            drift: 0,
            sleep,
        }
    }

    /// Account for a packet captured at `capture_ns` and return how long to
    /// wait before sending it.
    fn advance(&mut self, capture_ns: u64) -> Duration {
        let mut delay = Duration::ZERO;
        if self.previous_ns != 0 {
            let delta = capture_ns as i64 - self.previous_ns as i64;
            if delta > 0 {
                self.stats.push(delta);
                if self.sleep {
                    delay = Duration::from_millis(self.stats.average() / 1_000_000);
                }
            } else if delta < 0 {
                tracing::trace!(
                    capture_ns,
                    previous_ns = self.previous_ns,
                    "capture timestamp went backwards"
                );
            }
            self.drift += delta;
            if !(0..=DRIFT_RESET_NS).contains(&self.drift) {
                tracing::trace!(drift_ms = self.drift / 1_000_000, "pacing drift reset");
                self.drift = 0;
            }
        }
        self.previous_ns = capture_ns;
        delay
    }
}

fn closed() -> RtspError {
    RtspError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "RTP sockets closed",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn fill(pacer: &PacketPacer, capture_ns: u64) -> Result<()> {
        let mut buffer = pacer.allocate_buffer()?;
        buffer.payload_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        pacer.set_timestamp(&mut buffer, capture_ns);
        pacer.commit(buffer, 16)
    }

    #[test]
    fn first_packets_are_dropped() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let pacer = PacketPacer::new(90_000, PacerConfig::default()).unwrap();
        pacer.set_destination("127.0.0.1".parse().unwrap(), port, port + 1);
        for i in 0..=DROPPED_PACKETS {
            fill(&pacer, 1 + u64::from(i) * 1_000_000).unwrap();
        }

        let mut buf = [0u8; 64];
        assert!(receiver.recv(&mut buf).is_err());
        pacer.reset();
    }

    #[test]
    fn sequence_increments_and_ssrc_is_constant() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let pacer = PacketPacer::new(90_000, PacerConfig::default()).unwrap();
        pacer.set_destination("127.0.0.1".parse().unwrap(), port, port + 1);
        let total = DROPPED_PACKETS + 11;
        for i in 0..total {
            fill(&pacer, 1 + u64::from(i) * 1_000_000).unwrap();
        }

        let mut last = None;
        let mut buf = [0u8; 64];
        for _ in 0..10 {
            let n = receiver.recv(&mut buf).unwrap();
            assert_eq!(n, 16);
            assert_eq!(buf[0], 0x80);
            assert_eq!(buf[1] & 0x7f, 96);
            let seq = u16::from_be_bytes([buf[2], buf[3]]);
            let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
            assert_eq!(ssrc, pacer.ssrc());
            if let Some(prev) = last {
                assert_eq!(seq, u16::wrapping_add(prev, 1));
            }
            last = Some(seq);
        }
        // first transmitted packet carries sequence DROPPED_PACKETS + 2
        assert_eq!(last, Some((DROPPED_PACKETS + 11) as u16));
        pacer.reset();
    }

    const MS: u64 = 1_000_000;

    #[test]
    fn pacing_sleeps_only_with_a_jitter_buffer() {
        let mut paced = Pacing::new(true);
        let mut burst = Pacing::new(false);
        assert_eq!(paced.advance(MS), Duration::ZERO);
        assert_eq!(burst.advance(MS), Duration::ZERO);

        // 40 ms apart, less the 2 ms calibration bias
        assert_eq!(paced.advance(41 * MS), Duration::from_millis(38));
        assert_eq!(burst.advance(41 * MS), Duration::ZERO);

        // equal or earlier timestamps never sleep
        assert_eq!(paced.advance(41 * MS), Duration::ZERO);
        assert_eq!(paced.advance(30 * MS), Duration::ZERO);
    }

    #[test]
    fn drift_restarts_past_half_a_second() {
        let mut pacing = Pacing::new(false);
        let mut capture = MS;
        pacing.advance(capture);
        for _ in 0..12 {
            capture += 40 * MS;
            pacing.advance(capture);
        }
        assert_eq!(pacing.drift, 480 * MS as i64);

        capture += 40 * MS;
        pacing.advance(capture);
        assert_eq!(pacing.drift, 0);

        capture += 40 * MS;
        pacing.advance(capture);
        assert_eq!(pacing.drift, 40 * MS as i64);

        // a step back drops below zero and restarts as well
        pacing.advance(capture - 50 * MS);
        assert_eq!(pacing.drift, 0);
    }

    #[test]
    fn jitter_buffer_spreads_packets_out() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let config = PacerConfig {
            jitter_buffer: Duration::from_millis(100),
        };
        let pacer = PacketPacer::new(90_000, config).unwrap();
        pacer.set_destination("127.0.0.1".parse().unwrap(), port, port + 1);

        let started = Instant::now();
        for i in 0..DROPPED_PACKETS + 6 {
            fill(&pacer, MS + u64::from(i) * 20 * MS).unwrap();
        }

        let mut buf = [0u8; 64];
        let mut arrivals = Vec::new();
        for _ in 0..5 {
            receiver.recv(&mut buf).unwrap();
            arrivals.push(Instant::now());
        }

        // 100 ms of buffering, then 18 ms before each of the 31 packets
        // that precede the first one on the wire
        assert!(arrivals[0] - started >= Duration::from_millis(600));
        for pair in arrivals.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(12), "{:?}", pair[1] - pair[0]);
        }
        pacer.reset();
    }

    #[test]
    fn reset_unblocks_waiting_producer() {
        let pacer = Arc::new(PacketPacer::new(8_000, PacerConfig::default()).unwrap());
        // hold every slot without committing
        let held: Vec<_> = (0..RING_CAPACITY)
            .map(|_| pacer.allocate_buffer().unwrap())
            .collect();

        let waiter = {
            let pacer = pacer.clone();
            thread::spawn(move || pacer.allocate_buffer())
        };
        thread::sleep(Duration::from_millis(50));
        pacer.reset();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(RtspError::Interrupted)));

        // stale buffers are rejected, fresh ones accepted
        let stale = held.into_iter().next().unwrap();
        assert!(matches!(pacer.commit(stale, 20), Err(RtspError::Interrupted)));
        assert!(pacer.allocate_buffer().is_ok());
    }

    #[test]
    fn reset_joins_idle_thread_and_clears_counters() {
        let pacer = PacketPacer::new(90_000, PacerConfig::default()).unwrap();
        pacer.set_destination("127.0.0.1".parse().unwrap(), 9, 10);
        fill(&pacer, 1).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(pacer.is_running());
        assert_eq!(pacer.packets_sent(), 1);

        let started = Instant::now();
        pacer.reset();
        assert!(started.elapsed() < IDLE_TIMEOUT);
        assert!(!pacer.is_running());
        assert_eq!(pacer.packets_sent(), 0);
        assert_eq!(pacer.bitrate(), 0);

        // a new stream starts on the next commit
        fill(&pacer, 2).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(pacer.is_running());
        pacer.close();
        assert!(pacer.local_ports().is_none());
    }

    #[test]
    fn bitrate_starts_at_zero() {
        let pacer = PacketPacer::new(90_000, PacerConfig::default()).unwrap();
        assert_eq!(pacer.bitrate(), 0);
    }
}
