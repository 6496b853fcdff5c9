//! # AES67 Router
//!
//! Multichannel AES67 (RTP) streaming onto a fixed-size virtual audio device.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌────────────────────────────────────────────┐
//!  multicast ───▶ │ StreamReceiver (network::receiver)          │
//!  RTP/UDP        │  socket ─▶ validate ─▶ decode ─▶ de-interleave
//!                 └─────────────────────────────┬──────────────┘
//!                                               │ one SampleQueue per
//!                                               ▼ mapped device channel
//!                 ┌────────────────────────────────────────────┐
//!                 │ VirtualDevice (audio::device)               │
//!                 │  receive[0..128]      transmit[0..128]      │
//!                 └───────┬──────────────────────▲─────────────┘
//!                         │  drained / filled by │
//!                         ▼  the OS audio callback│
//!                 ┌────────────────────────────────────────────┐
//!  multicast ◀─── │ StreamTransmitter (network::sender)         │
//!  RTP/UDP        │  interleave ◀─ read queues ◀─ paced deadline│
//!                 └────────────────────────────────────────────┘
//!
//!  ChannelRouter (routing::router) decides which device channels each
//!  stream owns. It is consulted at setup and reconfiguration only; every
//!  running stream holds its own resolved copy of its mapping.
//! ```
//!
//! The network threads never take a lock on their per-packet path and never
//! allocate after startup. Queue access is single-producer/single-consumer
//! per device channel.

pub mod audio;
pub mod clock;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod network;
pub mod protocol;
pub mod routing;
pub mod streams;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Device channel slots per direction
    pub const DEVICE_CHANNEL_COUNT: usize = 128;

    /// Default sample rate for AES67 streams
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Highest sample rate accepted in a stream config
    pub const MAX_SAMPLE_RATE: u32 = 384_000;

    /// Default packet time (AES67 profile default of 1 ms)
    pub const DEFAULT_PACKET_TIME_US: u32 = 1000;

    /// Default per-channel queue capacity (100 ms at 48 kHz)
    pub const DEFAULT_QUEUE_CAPACITY: usize = 4800;

    /// Upper bound on frames in a single packet
    pub const MAX_FRAMES_PER_PACKET: usize = 480;

    /// Upper bound on RTP payload size (MTU - IP/UDP/RTP headers)
    pub const MAX_PAYLOAD_BYTES: usize = 1440;

    /// Receive buffer size, large enough for any UDP datagram
    pub const MAX_DATAGRAM_SIZE: usize = 65_536;

    /// Default multicast TTL
    pub const DEFAULT_MULTICAST_TTL: u32 = 32;

    /// Receiver sleep between empty socket polls
    pub const DEFAULT_POLL_INTERVAL_US: u64 = 500;

    /// A receiver is connected if a packet arrived within this window
    pub const DEFAULT_LIVENESS_MS: u64 = 1000;

    /// Default RTP port for AES67 streams
    pub const DEFAULT_RTP_PORT: u16 = 5004;
}
