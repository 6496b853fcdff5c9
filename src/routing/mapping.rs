//! Stream identifiers and stream-to-device channel mappings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::DEVICE_CHANNEL_COUNT;
use crate::error::RoutingError;

/// 128-bit stream identifier. The nil UUID means "unassigned".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    /// The unassigned id
    pub const NULL: StreamId = StreamId(Uuid::nil());

    /// Generate a fresh random id
    pub fn generate() -> Self {
        StreamId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        StreamId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for StreamId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(StreamId)
    }
}

/// Binds one stream to a region of the device channel space.
///
/// A sequential mapping owns `[device_channel_start, device_channel_start +
/// device_channel_count)`. A custom mapping owns exactly the indices in
/// `custom_channels`, one per stream channel, which need not be contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub stream_id: StreamId,
    pub name: String,
    /// Channels taken from the source stream
    pub stream_channel_count: usize,
    /// First source stream channel taken
    #[serde(default)]
    pub stream_channel_offset: usize,
    pub device_channel_start: usize,
    pub device_channel_count: usize,
    /// Explicit device channel per stream channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_channels: Option<Vec<usize>>,
}

impl ChannelMapping {
    /// Map `channel_count` stream channels onto consecutive device channels
    pub fn sequential(
        stream_id: StreamId,
        name: impl Into<String>,
        channel_count: usize,
        device_channel_start: usize,
    ) -> Self {
        Self {
            stream_id,
            name: name.into(),
            stream_channel_count: channel_count,
            stream_channel_offset: 0,
            device_channel_start,
            device_channel_count: channel_count,
            custom_channels: None,
        }
    }

    /// Map each stream channel to an explicit device channel.
    ///
    /// `device_channel_start`/`device_channel_count` are set to `0`/`len` so
    /// the range checks stay meaningful for the list length.
    pub fn custom(stream_id: StreamId, name: impl Into<String>, channels: Vec<usize>) -> Self {
        Self {
            stream_id,
            name: name.into(),
            stream_channel_count: channels.len(),
            stream_channel_offset: 0,
            device_channel_start: 0,
            device_channel_count: channels.len(),
            custom_channels: Some(channels),
        }
    }

    /// Take stream channels starting at `offset` instead of 0
    pub fn with_stream_offset(mut self, offset: usize) -> Self {
        self.stream_channel_offset = offset;
        self
    }

    pub fn is_custom(&self) -> bool {
        self.custom_channels.is_some()
    }

    /// Device channels this mapping claims, including any out-of-range
    /// custom entries. A sequential range is clipped at the device size.
    pub fn device_channels(&self) -> impl Iterator<Item = usize> + '_ {
        let (custom, range) = match &self.custom_channels {
            Some(list) => (list.as_slice(), 0..0),
            None => {
                let end = self
                    .device_channel_start
                    .saturating_add(self.device_channel_count)
                    .min(DEVICE_CHANNEL_COUNT);
                (&[][..], self.device_channel_start..end)
            }
        };
        custom.iter().copied().chain(range)
    }

    /// Device channel fed by (or feeding) mapped stream channel `index`.
    ///
    /// `index` counts from `stream_channel_offset`, so index 0 is source
    /// channel `stream_channel_offset`.
    pub fn device_channel_for(&self, index: usize) -> Option<usize> {
        if index >= self.stream_channel_count {
            return None;
        }
        match &self.custom_channels {
            Some(list) => list.get(index).copied(),
            None if index < self.device_channel_count => {
                self.device_channel_start.checked_add(index)
            }
            None => None,
        }
    }

    /// Self-consistency checks.
    ///
    /// Custom lists are checked for length only; individual entries are
    /// neither range-checked nor checked for duplicates.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.stream_id.is_null() {
            return Err(RoutingError::NullStreamId);
        }
        if self.stream_channel_count == 0 {
            return Err(RoutingError::ZeroStreamChannels);
        }
        if self.device_channel_count == 0 {
            return Err(RoutingError::ZeroDeviceChannels);
        }
        if self.device_channel_start >= DEVICE_CHANNEL_COUNT {
            return Err(RoutingError::StartOutOfRange {
                start: self.device_channel_start,
                max: DEVICE_CHANNEL_COUNT - 1,
            });
        }
        match self.device_channel_start.checked_add(self.device_channel_count) {
            Some(end) if end <= DEVICE_CHANNEL_COUNT => {}
            end => {
                return Err(RoutingError::RangeExceedsDevice {
                    start: self.device_channel_start,
                    end: end.unwrap_or(usize::MAX),
                    max: DEVICE_CHANNEL_COUNT,
                });
            }
        }
        if self
            .stream_channel_offset
            .checked_add(self.stream_channel_count)
            .is_none()
        {
            return Err(RoutingError::StreamRangeOverflow {
                offset: self.stream_channel_offset,
                count: self.stream_channel_count,
            });
        }
        if let Some(list) = &self.custom_channels {
            if list.len() != self.stream_channel_count {
                return Err(RoutingError::CustomChannelCount {
                    expected: self.stream_channel_count,
                    actual: list.len(),
                });
            }
        }
        Ok(())
    }

    /// Check if the two mappings claim a common device channel
    pub fn overlaps(&self, other: &ChannelMapping) -> bool {
        self.device_channels()
            .any(|ch| other.device_channels().any(|o| o == ch))
    }
}

impl fmt::Display for ChannelMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.custom_channels {
            Some(list) => write!(f, "{} ({}) -> {:?}", self.name, self.stream_id, list),
            None => write!(
                f,
                "{} ({}) -> {}..{}",
                self.name,
                self.stream_id,
                self.device_channel_start,
                self.device_channel_start.saturating_add(self.device_channel_count)
            ),
        }
    }
}
