//! Configuration
//!
//! [`AppConfig`] is the process-level TOML file. [`StreamConfig`] is the
//! per-stream record produced by the session description parser.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::AudioEncoding;
use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::DEFAULT_PAYLOAD_TYPE;

/// Which device surface a stream is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    /// Network to device
    Receive,
    /// Device to network
    Transmit,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Receive => f.write_str("receive"),
            StreamDirection::Transmit => f.write_str("transmit"),
        }
    }
}

/// Stream parameters as negotiated by the session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    /// Destination (usually multicast) IPv4 address
    pub address: String,
    pub port: u16,
    #[serde(default = "default_payload_type")]
    pub payload_type: u8,
    /// SDP encoding name, "L16" or "L24"
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    pub channel_count: usize,
    /// Packet duration in microseconds
    #[serde(default = "default_packet_time_us")]
    pub packet_time_us: u32,
}

fn default_payload_type() -> u8 {
    DEFAULT_PAYLOAD_TYPE
}

fn default_encoding() -> String {
    AudioEncoding::L24.name().to_string()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_packet_time_us() -> u32 {
    DEFAULT_PACKET_TIME_US
}

impl StreamConfig {
    /// A 48 kHz L24 stream with 1 ms packets
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        channel_count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            payload_type: DEFAULT_PAYLOAD_TYPE,
            encoding: default_encoding(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channel_count,
            packet_time_us: DEFAULT_PACKET_TIME_US,
        }
    }

    pub fn with_encoding(mut self, encoding: AudioEncoding) -> Self {
        self.encoding = encoding.name().to_string();
        self
    }

    /// Check the preconditions for starting a stream
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ip()?;
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.channel_count == 0 || self.channel_count > DEVICE_CHANNEL_COUNT {
            return Err(ConfigError::ChannelCount(self.channel_count));
        }
        self.audio_encoding()?;
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        Ok(())
    }

    /// Parsed destination address
    pub fn ip(&self) -> Result<Ipv4Addr, ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.address.clone()))
    }

    pub fn socket_addr(&self) -> Result<SocketAddrV4, ConfigError> {
        Ok(SocketAddrV4::new(self.ip()?, self.port))
    }

    pub fn audio_encoding(&self) -> Result<AudioEncoding, ConfigError> {
        self.encoding.parse()
    }

    /// Frames carried by one packet
    pub fn frames_per_packet(&self) -> usize {
        (self.sample_rate as u64 * self.packet_time_us as u64 / 1_000_000) as usize
    }

    /// Frames per packet, checked against the admissible range
    pub fn checked_frames_per_packet(&self, max: usize) -> Result<usize, ConfigError> {
        let frames = self.frames_per_packet();
        if frames == 0 || frames > max {
            return Err(ConfigError::PacketTime {
                packet_time_us: self.packet_time_us,
                frames,
                max,
            });
        }
        Ok(frames)
    }

    /// Duration of the frames one packet carries. Shorter than
    /// `packet_time_us` when the rate does not divide it evenly, e.g. 44
    /// frames per 1 ms at 44.1 kHz.
    pub fn packet_interval(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::from_micros(self.packet_time_us as u64);
        }
        Duration::from_nanos(
            self.frames_per_packet() as u64 * 1_000_000_000 / self.sample_rate as u64,
        )
    }
}

/// Virtual device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub receive_channels: usize,
    pub transmit_channels: usize,
    /// Samples per channel queue
    pub queue_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            receive_channels: DEVICE_CHANNEL_COUNT,
            transmit_channels: DEVICE_CHANNEL_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Network thread configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface used for multicast membership and egress
    pub interface: Ipv4Addr,
    pub multicast_ttl: u32,
    pub multicast_loop: bool,
    /// Receiver sleep between empty polls
    pub poll_interval_us: u64,
    /// Window after the last packet during which a stream counts as connected
    pub liveness_ms: u64,
    pub max_frames_per_packet: usize,
    pub max_payload_bytes: usize,
    pub recv_buffer_bytes: usize,
}

impl NetworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            multicast_loop: true,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            liveness_ms: DEFAULT_LIVENESS_MS,
            max_frames_per_packet: MAX_FRAMES_PER_PACKET,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            recv_buffer_bytes: 1 << 20,
        }
    }
}

/// Routing persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Where the routing table is persisted, if anywhere
    pub state_file: Option<PathBuf>,
}

impl RoutingConfig {
    /// Per-direction state file, e.g. `routing.json` becomes
    /// `routing.receive.json`
    pub fn state_file_for(&self, direction: StreamDirection) -> Option<PathBuf> {
        let path = self.state_file.as_ref()?;
        let stem = path.file_stem()?.to_string_lossy();
        let name = match path.extension() {
            Some(ext) => format!("{}.{}.{}", stem, direction, ext.to_string_lossy()),
            None => format!("{}.{}", stem, direction),
        };
        Some(path.with_file_name(name))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
    pub receive_streams: Vec<StreamConfig>,
    pub transmit_streams: Vec<StreamConfig>,
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "aes67", "aes67-router")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// when the file does not exist
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };

        if path.exists() {
            tracing::info!("Loading config from {}", path.display());
            Self::load(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}
