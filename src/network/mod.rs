//! Network subsystem for RTP audio transport

pub mod receiver;
pub mod sender;
pub mod stats;
pub mod udp;

pub use receiver::{PacketProcessor, StreamReceiver};
pub use sender::{PacketBuilder, StreamTransmitter};
pub use stats::{StreamStatistics, StreamStats};
pub use udp::PacketTransport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::SharedSampleQueue;
use crate::routing::ChannelMapping;

/// Cooperative stop signal shared between a stream and its network thread
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One stream channel bound to one device queue, resolved at setup
#[derive(Debug, Clone)]
pub(crate) struct ChannelRoute {
    /// Index into the interleaved frame
    pub stream_channel: usize,
    pub queue: SharedSampleQueue,
}

/// Resolve a mapping against a set of device queues.
///
/// Mapped channels that fall outside the stream's interleaved frame or the
/// device's queue bank are skipped.
pub(crate) fn resolve_routes<'a>(
    mapping: &ChannelMapping,
    stream_channels: usize,
    queue_for: impl Fn(usize) -> Option<&'a SharedSampleQueue>,
) -> Vec<ChannelRoute> {
    let mut routes = Vec::with_capacity(mapping.stream_channel_count);

    for index in 0..mapping.stream_channel_count {
        let Some(stream_channel) = mapping.stream_channel_offset.checked_add(index) else {
            continue;
        };
        if stream_channel >= stream_channels {
            tracing::debug!(
                "{}: stream channel {} beyond the {}-channel frame, skipped",
                mapping.name,
                stream_channel,
                stream_channels
            );
            continue;
        }

        let Some(device_channel) = mapping.device_channel_for(index) else {
            continue;
        };
        match queue_for(device_channel) {
            Some(queue) => routes.push(ChannelRoute {
                stream_channel,
                queue: Arc::clone(queue),
            }),
            None => tracing::warn!(
                "{}: device channel {} does not exist, skipped",
                mapping.name,
                device_channel
            ),
        }
    }

    routes
}
