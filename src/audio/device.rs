//! Virtual device channel bank
//!
//! The operating system's audio callback sees a fixed number of device
//! channels in each direction. Every channel is backed by its own
//! [`SampleQueue`](crate::audio::SampleQueue): the network side writes receive queues and reads
//! transmit queues, the device callback does the opposite.

use crate::audio::buffer::{create_shared_queue, SharedSampleQueue};
use crate::config::{DeviceConfig, StreamDirection};

/// Queue bank backing the virtual audio device
pub struct VirtualDevice {
    receive: Vec<SharedSampleQueue>,
    transmit: Vec<SharedSampleQueue>,
    queue_capacity: usize,
}

impl VirtualDevice {
    /// Create a device with the given channel counts and per-channel queue capacity
    pub fn new(receive_channels: usize, transmit_channels: usize, queue_capacity: usize) -> Self {
        let make = |count: usize| {
            (0..count)
                .map(|_| create_shared_queue(queue_capacity))
                .collect::<Vec<_>>()
        };

        Self {
            receive: make(receive_channels),
            transmit: make(transmit_channels),
            queue_capacity,
        }
    }

    /// Create a device from configuration
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.receive_channels,
            config.transmit_channels,
            config.queue_capacity,
        )
    }

    /// Queue fed by the network and drained by the device callback
    pub fn receive_queue(&self, channel: usize) -> Option<&SharedSampleQueue> {
        self.receive.get(channel)
    }

    /// Queue filled by the device callback and drained by the network
    pub fn transmit_queue(&self, channel: usize) -> Option<&SharedSampleQueue> {
        self.transmit.get(channel)
    }

    /// Queue on the network side of a stream in the given direction
    pub fn queue(&self, direction: StreamDirection, channel: usize) -> Option<&SharedSampleQueue> {
        match direction {
            StreamDirection::Receive => self.receive_queue(channel),
            StreamDirection::Transmit => self.transmit_queue(channel),
        }
    }

    /// Number of receive channels
    pub fn receive_channels(&self) -> usize {
        self.receive.len()
    }

    /// Number of transmit channels
    pub fn transmit_channels(&self) -> usize {
        self.transmit.len()
    }

    /// Capacity of every queue, in samples
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Empty every queue.
    ///
    /// Only valid while no stream thread and no device callback is running.
    pub fn reset_all(&self) {
        for queue in self.receive.iter().chain(self.transmit.iter()) {
            queue.reset();
        }
    }
}

impl std::fmt::Debug for VirtualDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDevice")
            .field("receive_channels", &self.receive.len())
            .field("transmit_channels", &self.transmit.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_lookup() {
        let device = VirtualDevice::new(4, 2, 16);
        assert_eq!(device.receive_channels(), 4);
        assert_eq!(device.transmit_channels(), 2);
        assert!(device.receive_queue(3).is_some());
        assert!(device.receive_queue(4).is_none());
        assert!(device.transmit_queue(2).is_none());
        assert_eq!(device.queue(StreamDirection::Transmit, 1).unwrap().capacity(), 16);
    }

    #[test]
    fn test_directions_are_independent() {
        let device = VirtualDevice::new(1, 1, 8);
        device.receive_queue(0).unwrap().write(&[0.5; 4]);
        assert_eq!(device.receive_queue(0).unwrap().available(), 4);
        assert!(device.transmit_queue(0).unwrap().is_empty());

        device.reset_all();
        assert!(device.receive_queue(0).unwrap().is_empty());
    }
}
