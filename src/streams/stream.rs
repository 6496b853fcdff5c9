//! A running stream of either direction

use serde::Serialize;

use crate::config::{StreamConfig, StreamDirection};
use crate::context::EngineContext;
use crate::error::Result;
use crate::network::{StreamReceiver, StreamStatistics, StreamTransmitter};
use crate::routing::{ChannelMapping, StreamId};

/// Receiver or transmitter owned by the manager
pub enum ManagedStream {
    Receiver(StreamReceiver),
    Transmitter(StreamTransmitter),
}

impl ManagedStream {
    pub fn new(
        context: &EngineContext,
        direction: StreamDirection,
        config: StreamConfig,
        mapping: ChannelMapping,
    ) -> Self {
        match direction {
            StreamDirection::Receive => {
                Self::Receiver(StreamReceiver::new(context, config, mapping))
            }
            StreamDirection::Transmit => {
                Self::Transmitter(StreamTransmitter::new(context, config, mapping))
            }
        }
    }

    pub fn direction(&self) -> StreamDirection {
        match self {
            Self::Receiver(_) => StreamDirection::Receive,
            Self::Transmitter(_) => StreamDirection::Transmit,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self {
            Self::Receiver(rx) => rx.start(),
            Self::Transmitter(tx) => tx.start(),
        }
    }

    pub fn stop(&mut self) {
        match self {
            Self::Receiver(rx) => rx.stop(),
            Self::Transmitter(tx) => tx.stop(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            Self::Receiver(rx) => rx.is_running(),
            Self::Transmitter(tx) => tx.is_running(),
        }
    }

    pub fn update_mapping(&mut self, mapping: ChannelMapping) -> Result<()> {
        match self {
            Self::Receiver(rx) => rx.update_mapping(mapping),
            Self::Transmitter(tx) => tx.update_mapping(mapping),
        }
    }

    pub fn statistics(&self) -> StreamStatistics {
        match self {
            Self::Receiver(rx) => rx.statistics(),
            Self::Transmitter(tx) => tx.statistics(),
        }
    }

    pub fn reset_statistics(&self) {
        match self {
            Self::Receiver(rx) => rx.reset_statistics(),
            Self::Transmitter(tx) => tx.reset_statistics(),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        match self {
            Self::Receiver(rx) => rx.config(),
            Self::Transmitter(tx) => tx.config(),
        }
    }

    pub fn mapping(&self) -> &ChannelMapping {
        match self {
            Self::Receiver(rx) => rx.mapping(),
            Self::Transmitter(tx) => tx.mapping(),
        }
    }

    pub fn status(&self) -> StreamStatus {
        let config = self.config();
        StreamStatus {
            stream_id: self.mapping().stream_id,
            name: config.name.clone(),
            direction: self.direction(),
            address: config.address.clone(),
            port: config.port,
            encoding: config.encoding.clone(),
            channel_count: config.channel_count,
            running: self.is_running(),
            connected: match self {
                Self::Receiver(rx) => Some(rx.is_connected()),
                Self::Transmitter(_) => None,
            },
            ssrc: match self {
                Self::Receiver(_) => None,
                Self::Transmitter(tx) => Some(tx.ssrc()),
            },
            mapping: self.mapping().clone(),
            statistics: self.statistics(),
        }
    }
}

/// Operator-facing summary of one stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream_id: StreamId,
    pub name: String,
    pub direction: StreamDirection,
    pub address: String,
    pub port: u16,
    pub encoding: String,
    pub channel_count: usize,
    pub running: bool,
    /// Receivers only
    pub connected: Option<bool>,
    /// Transmitters only
    pub ssrc: Option<u32>,
    pub mapping: ChannelMapping,
    pub statistics: StreamStatistics,
}
