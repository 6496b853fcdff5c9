//! Audio subsystem module

pub mod buffer;
pub mod device;

pub use buffer::{create_shared_queue, SampleQueue, SharedSampleQueue};
pub use device::VirtualDevice;
