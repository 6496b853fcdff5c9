//! Media clock seam
//!
//! A disciplined time base (PTP or similar) lives outside this crate. The
//! transmitter asks the clock for its starting RTP timestamp and from then
//! on advances purely by frame count.

use chrono::Utc;

/// Source of media time
pub trait MediaClock: Send + Sync {
    /// Current media time in samples at `sample_rate`, truncated to 32 bits
    fn rtp_timestamp(&self, sample_rate: u32) -> u32;

    /// Whether the clock follows an external reference
    fn is_locked(&self) -> bool {
        false
    }

    /// Human-readable clock name for logs
    fn name(&self) -> &str;
}

/// Wall clock since the Unix epoch, free-running
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl MediaClock for SystemClock {
    fn rtp_timestamp(&self, sample_rate: u32) -> u32 {
        let now = Utc::now();
        let secs = now.timestamp() as u64;
        let nanos = now.timestamp_subsec_nanos() as u64;
        let samples = secs
            .wrapping_mul(sample_rate as u64)
            .wrapping_add(nanos * sample_rate as u64 / 1_000_000_000);
        samples as u32
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Clock pinned to one timestamp, for tests and offline use
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub timestamp: u32,
}

impl MediaClock for FixedClock {
    fn rtp_timestamp(&self, _sample_rate: u32) -> u32 {
        self.timestamp
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
