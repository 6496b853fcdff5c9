//! Linear PCM codecs for AES67 payloads
//!
//! Both encodings are big-endian two's complement with no padding bytes.
//! Encoding and decoding are pure functions over caller-owned buffers and
//! never allocate.

pub mod decoder;
pub mod encoder;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CodecError, ConfigError};

pub use decoder::{decode_l16, decode_l24};
pub use encoder::{encode_l16, encode_l24};

/// Network sample encoding negotiated for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioEncoding {
    /// 16-bit linear PCM
    L16,
    /// 24-bit linear PCM
    L24,
}

impl AudioEncoding {
    /// Look up an encoding by its SDP name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("L16") {
            Some(AudioEncoding::L16)
        } else if name.eq_ignore_ascii_case("L24") {
            Some(AudioEncoding::L24)
        } else {
            None
        }
    }

    /// SDP encoding name
    pub fn name(&self) -> &'static str {
        match self {
            AudioEncoding::L16 => "L16",
            AudioEncoding::L24 => "L24",
        }
    }

    /// Bytes per encoded sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::L16 => 2,
            AudioEncoding::L24 => 3,
        }
    }

    /// Encoded size of `frames` frames of `channels` channels
    pub fn payload_size(&self, frames: usize, channels: usize) -> usize {
        frames * channels * self.bytes_per_sample()
    }

    /// Encode samples into `out`, returning the number of bytes written
    pub fn encode(&self, samples: &[f32], out: &mut [u8]) -> Result<usize, CodecError> {
        match self {
            AudioEncoding::L16 => encode_l16(samples, out),
            AudioEncoding::L24 => encode_l24(samples, out),
        }
    }

    /// Decode a payload into `out`, returning the number of samples written
    pub fn decode(&self, payload: &[u8], out: &mut [f32]) -> Result<usize, CodecError> {
        match self {
            AudioEncoding::L16 => decode_l16(payload, out),
            AudioEncoding::L24 => decode_l24(payload, out),
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioEncoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s.trim()).ok_or_else(|| ConfigError::UnsupportedEncoding(s.to_string()))
    }
}
