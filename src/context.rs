//! Shared engine context
//!
//! Everything a stream needs from its surroundings is reached through an
//! [`EngineContext`] built once at startup and handed to each component.

use std::sync::Arc;

use crate::audio::VirtualDevice;
use crate::clock::{MediaClock, SystemClock};
use crate::config::{AppConfig, NetworkConfig, StreamDirection};
use crate::routing::ChannelRouter;

/// Device, routers, clock and network settings shared by all streams
pub struct EngineContext {
    pub device: Arc<VirtualDevice>,
    pub receive_router: Arc<ChannelRouter>,
    pub transmit_router: Arc<ChannelRouter>,
    pub clock: Arc<dyn MediaClock>,
    pub network: NetworkConfig,
}

impl EngineContext {
    /// Build a context using the free-running system clock
    pub fn new(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a context around an externally supplied clock
    pub fn with_clock(config: &AppConfig, clock: Arc<dyn MediaClock>) -> Self {
        tracing::debug!(
            "Engine context: {} rx / {} tx channels, {} samples per queue, {} clock",
            config.device.receive_channels,
            config.device.transmit_channels,
            config.device.queue_capacity,
            clock.name()
        );

        Self {
            device: Arc::new(VirtualDevice::from_config(&config.device)),
            receive_router: Arc::new(ChannelRouter::new()),
            transmit_router: Arc::new(ChannelRouter::new()),
            clock,
            network: config.network.clone(),
        }
    }

    /// Router for the device surface of the given direction
    pub fn router(&self, direction: StreamDirection) -> &Arc<ChannelRouter> {
        match direction {
            StreamDirection::Receive => &self.receive_router,
            StreamDirection::Transmit => &self.transmit_router,
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("device", &self.device)
            .field("clock", &self.clock.name())
            .field("network", &self.network)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ChannelMapping;
    use crate::routing::StreamId;

    #[test]
    fn test_routers_are_independent() {
        let ctx = EngineContext::new(&AppConfig::default());
        let mapping = ChannelMapping::sequential(StreamId::generate(), "a", 2, 0);

        ctx.router(StreamDirection::Receive)
            .add_mapping(mapping.clone())
            .unwrap();
        assert!(ctx.router(StreamDirection::Transmit).add_mapping(mapping).is_ok());
        assert_eq!(ctx.receive_router.mapping_count(), 1);
        assert_eq!(ctx.device.receive_channels(), 128);
    }
}
