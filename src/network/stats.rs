//! Per-stream statistics
//!
//! Counters are written by the network thread with relaxed atomics and read
//! from anywhere through [`StreamStats::snapshot`].

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NEVER: u64 = u64::MAX;

/// Live counters owned by one stream
#[derive(Debug)]
pub struct StreamStats {
    packets_received: AtomicU64,
    packets_lost: AtomicU64,
    packets_malformed: AtomicU64,
    packets_sent: AtomicU64,
    send_errors: AtomicU64,
    buffer_underruns: AtomicU64,
    buffer_overruns: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    /// Wall-clock time of the last packet, unix milliseconds (0 = none)
    last_packet_ms: AtomicI64,
    /// Monotonic time of the last packet, micros since `epoch`
    last_packet_us: AtomicU64,
    epoch: Instant,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            packets_received: AtomicU64::new(0),
            packets_lost: AtomicU64::new(0),
            packets_malformed: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            buffer_underruns: AtomicU64::new(0),
            buffer_overruns: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            last_packet_ms: AtomicI64::new(0),
            last_packet_us: AtomicU64::new(NEVER),
            epoch: Instant::now(),
        }
    }

    /// An accepted packet of `bytes` bytes
    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_lost(&self, count: u64) {
        self.packets_lost.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.packets_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A receive queue could not take a whole packet
    pub fn record_underrun(&self) {
        self.buffer_underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// A transmit queue could not supply a whole packet
    pub fn record_overrun(&self) {
        self.buffer_overruns.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_micros() as u64;
        self.last_packet_us.store(elapsed, Ordering::Relaxed);
        self.last_packet_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Time since the last packet, `None` if there has been none
    pub fn since_last_packet(&self) -> Option<Duration> {
        match self.last_packet_us.load(Ordering::Relaxed) {
            NEVER => None,
            us => Some(self.epoch.elapsed().saturating_sub(Duration::from_micros(us))),
        }
    }

    pub fn snapshot(&self) -> StreamStatistics {
        let last_ms = self.last_packet_ms.load(Ordering::Relaxed);
        StreamStatistics {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            buffer_underruns: self.buffer_underruns.load(Ordering::Relaxed),
            buffer_overruns: self.buffer_overruns.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            last_packet_time: if last_ms == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_ms).single()
            },
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.packets_received,
            &self.packets_lost,
            &self.packets_malformed,
            &self.packets_sent,
            &self.send_errors,
            &self.buffer_underruns,
            &self.buffer_overruns,
            &self.bytes_received,
            &self.bytes_sent,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        // Liveness is not a counter and survives the reset
        self.last_packet_ms.store(0, Ordering::Relaxed);
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a stream's counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStatistics {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_malformed: u64,
    pub packets_sent: u64,
    pub send_errors: u64,
    pub buffer_underruns: u64,
    pub buffer_overruns: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub last_packet_time: Option<DateTime<Utc>>,
}

impl StreamStatistics {
    /// Lost packets as a fraction of expected packets
    pub fn loss_rate(&self) -> f64 {
        let expected = self.packets_received + self.packets_lost;
        if expected == 0 {
            0.0
        } else {
            self.packets_lost as f64 / expected as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = StreamStats::new();
        assert!(stats.since_last_packet().is_none());
        assert!(stats.snapshot().last_packet_time.is_none());

        stats.record_received(300);
        stats.record_received(300);
        stats.record_lost(2);
        stats.record_malformed();

        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 2);
        assert_eq!(snap.bytes_received, 600);
        assert_eq!(snap.packets_lost, 2);
        assert_eq!(snap.packets_malformed, 1);
        assert!(snap.last_packet_time.is_some());
        assert!((snap.loss_rate() - 0.5).abs() < 1e-9);
        assert!(stats.since_last_packet().unwrap() < Duration::from_secs(5));

        stats.reset();
        assert_eq!(stats.snapshot(), StreamStatistics::default());
        assert!(stats.since_last_packet().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn test_reset_without_packets_stays_idle() {
        let stats = StreamStats::new();
        stats.record_sent(100);
        stats.reset();
        assert!(stats.since_last_packet().is_none());
    }

    #[test]
    fn test_loss_rate_empty() {
        assert_eq!(StreamStatistics::default().loss_rate(), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = StreamStats::new();
        stats.record_sent(100);
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"packets_sent\":1"));
    }
}
