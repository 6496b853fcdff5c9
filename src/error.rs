//! Error types for the streaming engine

use thiserror::Error;

use crate::routing::StreamId;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream and application configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Destination address is empty")]
    EmptyAddress,

    #[error("Invalid destination address: {0}")]
    InvalidAddress(String),

    #[error("Port must be non-zero")]
    ZeroPort,

    #[error("Channel count {0} outside 1..=128")]
    ChannelCount(usize),

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Unsupported sample rate: {0}")]
    SampleRate(u32),

    #[error("Packet time {packet_time_us}us yields {frames} frames per packet (max {max})")]
    PacketTime {
        packet_time_us: u32,
        frames: usize,
        max: usize,
    },

    #[error("Payload of {bytes} bytes per packet exceeds the {max}-byte limit")]
    PayloadSize { bytes: usize, max: usize },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel routing errors; the display text is the operator-facing description
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Stream id is null")]
    NullStreamId,

    #[error("Stream channel count must be greater than zero")]
    ZeroStreamChannels,

    #[error("Device channel count must be greater than zero")]
    ZeroDeviceChannels,

    #[error("Device channel start {start} is out of range (max {max})")]
    StartOutOfRange { start: usize, max: usize },

    #[error("Device channels {start}..{end} exceed the device size {max}")]
    RangeExceedsDevice { start: usize, end: usize, max: usize },

    #[error("Stream channels {offset}+{count} overflow the channel index")]
    StreamRangeOverflow { offset: usize, count: usize },

    #[error("Custom channel map has {actual} entries but the stream has {expected} channels")]
    CustomChannelCount { expected: usize, actual: usize },

    #[error("Device channel {channel} is already owned by stream {owner}")]
    Overlap { channel: usize, owner: StreamId },

    #[error("Stream {0} has no mapping")]
    UnknownStream(StreamId),

    #[error("Stream {0} is already mapped")]
    AlreadyMapped(StreamId),

    #[error("No run of {requested} free device channels")]
    NoFreeChannels { requested: usize },

    #[error("Cannot replace the routing table while {0} streams are active")]
    StreamsActive(usize),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Multicast join failed for {group}: {reason}")]
    MulticastJoin { group: String, reason: String },

    #[error("Socket setup failed: {0}")]
    Socket(String),

    #[error("Stream is already running")]
    AlreadyRunning,

    #[error("Failed to spawn network thread: {0}")]
    Thread(String),
}

/// Reasons an incoming packet is rejected as malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Unsupported RTP version {0}")]
    BadVersion(u8),

    #[error("Payload type {actual} does not match expected {expected}")]
    PayloadTypeMismatch { expected: u8, actual: u8 },

    #[error("CSRC list or header extension runs past the packet end")]
    Truncated,

    #[error("Invalid padding length {0}")]
    BadPadding(u8),

    #[error("Empty payload")]
    EmptyPayload,

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Payload of {len} bytes is not a whole number of {frame_size}-byte frames")]
    PartialFrame { len: usize, frame_size: usize },

    #[error("Frame count {frames} outside 1..={max}")]
    FrameCount { frames: usize, max: usize },
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Output buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Payload of {len} bytes is not a whole number of {sample_size}-byte samples")]
    UnalignedPayload { len: usize, sample_size: usize },
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
