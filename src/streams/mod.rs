//! Stream lifecycle management

pub mod manager;
pub mod stream;

pub use manager::StreamManager;
pub use stream::{ManagedStream, StreamStatus};
