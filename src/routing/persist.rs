//! Persisted routing state
//!
//! The file format is owned by whoever persists it; this module only
//! defines the records and their JSON form.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::routing::mapping::{ChannelMapping, StreamId};

/// Current persisted format version
pub const ROUTING_STATE_VERSION: u32 = 1;

/// One persisted mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    /// Stream id in hyphenated string form
    pub stream_id: String,
    pub name: String,
    pub stream_channel_count: usize,
    #[serde(default)]
    pub stream_channel_offset: usize,
    pub device_channel_start: usize,
    pub device_channel_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_channels: Option<Vec<usize>>,
}

impl From<&ChannelMapping> for MappingRecord {
    fn from(mapping: &ChannelMapping) -> Self {
        Self {
            stream_id: mapping.stream_id.to_string(),
            name: mapping.name.clone(),
            stream_channel_count: mapping.stream_channel_count,
            stream_channel_offset: mapping.stream_channel_offset,
            device_channel_start: mapping.device_channel_start,
            device_channel_count: mapping.device_channel_count,
            custom_channels: mapping.custom_channels.clone(),
        }
    }
}

impl TryFrom<&MappingRecord> for ChannelMapping {
    type Error = uuid::Error;

    fn try_from(record: &MappingRecord) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            stream_id: record.stream_id.parse::<StreamId>()?,
            name: record.name.clone(),
            stream_channel_count: record.stream_channel_count,
            stream_channel_offset: record.stream_channel_offset,
            device_channel_start: record.device_channel_start,
            device_channel_count: record.device_channel_count,
            custom_channels: record.custom_channels.clone(),
        })
    }
}

/// Full routing table as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub mappings: Vec<MappingRecord>,
}

fn default_version() -> u32 {
    ROUTING_STATE_VERSION
}

impl RoutingState {
    pub fn new(mappings: Vec<MappingRecord>) -> Self {
        Self {
            version: ROUTING_STATE_VERSION,
            mappings,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Write to a JSON file, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl Default for RoutingState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
