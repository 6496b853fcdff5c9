//! Stream to device channel routing

pub mod mapping;
pub mod persist;
pub mod router;

pub use mapping::{ChannelMapping, StreamId};
pub use persist::{MappingRecord, RoutingState};
pub use router::ChannelRouter;
