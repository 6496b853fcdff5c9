//! Stream manager
//!
//! Owns every running stream and keeps the routers in step with them. A
//! stream is only ever running while its mapping is committed in the router
//! for its direction.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{StreamConfig, StreamDirection};
use crate::context::EngineContext;
use crate::error::{Error, Result, RoutingError};
use crate::network::StreamStatistics;
use crate::routing::{ChannelMapping, RoutingState, StreamId};
use crate::streams::stream::{ManagedStream, StreamStatus};

pub struct StreamManager {
    context: Arc<EngineContext>,
    streams: Mutex<BTreeMap<StreamId, ManagedStream>>,
}

impl StreamManager {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self {
            context,
            streams: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Start a stream on the first free run of device channels
    pub fn add_stream(&self, config: StreamConfig, direction: StreamDirection) -> Result<StreamId> {
        config.validate()?;

        let stream_id = StreamId::generate();
        let mapping = self
            .context
            .router(direction)
            .create_default_mapping(stream_id, &config.name, config.channel_count)
            .ok_or(RoutingError::NoFreeChannels {
                requested: config.channel_count,
            })?;

        self.add_stream_with_mapping(config, direction, mapping)?;
        Ok(stream_id)
    }

    /// Start a stream on an explicit mapping
    pub fn add_stream_with_mapping(
        &self,
        config: StreamConfig,
        direction: StreamDirection,
        mapping: ChannelMapping,
    ) -> Result<()> {
        let stream_id = mapping.stream_id;
        let router = self.context.router(direction);

        let mut streams = self.streams.lock();
        if streams.contains_key(&stream_id) {
            return Err(RoutingError::AlreadyMapped(stream_id).into());
        }
        router.add_mapping(mapping.clone())?;

        let mut stream = ManagedStream::new(&self.context, direction, config, mapping);
        if let Err(e) = stream.start() {
            tracing::error!("Failed to start stream {}: {}", stream_id, e);
            let _ = router.remove_mapping(stream_id);
            return Err(e);
        }

        streams.insert(stream_id, stream);
        Ok(())
    }

    /// Start a stream whose mapping is already in the router, e.g. one
    /// restored from a saved routing table
    pub fn attach_stream(
        &self,
        stream_id: StreamId,
        config: StreamConfig,
        direction: StreamDirection,
    ) -> Result<()> {
        let mapping = self
            .context
            .router(direction)
            .mapping(stream_id)
            .ok_or(RoutingError::UnknownStream(stream_id))?;

        let mut streams = self.streams.lock();
        if streams.contains_key(&stream_id) {
            return Err(RoutingError::AlreadyMapped(stream_id).into());
        }

        let mut stream = ManagedStream::new(&self.context, direction, config, mapping);
        stream.start()?;
        streams.insert(stream_id, stream);
        Ok(())
    }

    /// Start a batch of configured streams.
    ///
    /// A stream whose name matches a mapping already in the router (restored
    /// from disk) keeps that mapping; others get a default one. Restored
    /// mappings no stream claims are dropped first so their channels are
    /// free for the rest. Failures are logged and skipped.
    pub fn start_streams(
        &self,
        direction: StreamDirection,
        configs: &[StreamConfig],
    ) -> Vec<StreamId> {
        let router = self.context.router(direction);
        let mut unclaimed = router.all_mappings();

        let claims: Vec<Option<StreamId>> = configs
            .iter()
            .map(|config| {
                let index = unclaimed.iter().position(|m| m.name == config.name)?;
                Some(unclaimed.remove(index).stream_id)
            })
            .collect();

        for mapping in unclaimed {
            tracing::info!("Dropping unused mapping {}", mapping);
            let _ = router.remove_mapping(mapping.stream_id);
        }

        let mut started = Vec::with_capacity(configs.len());
        for (config, claim) in configs.iter().zip(claims) {
            let result = match claim {
                Some(stream_id) => self
                    .attach_stream(stream_id, config.clone(), direction)
                    .map(|()| stream_id)
                    .map_err(|e| {
                        let _ = router.remove_mapping(stream_id);
                        e
                    }),
                None => self.add_stream(config.clone(), direction),
            };
            match result {
                Ok(stream_id) => started.push(stream_id),
                Err(e) => tracing::error!(
                    "Could not start {} stream '{}': {}",
                    direction,
                    config.name,
                    e
                ),
            }
        }

        started
    }

    /// Stop a stream and release its device channels
    pub fn remove_stream(&self, stream_id: StreamId) -> Result<()> {
        let mut stream = self
            .streams
            .lock()
            .remove(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;

        stream.stop();
        if let Err(e) = self.context.router(stream.direction()).remove_mapping(stream_id) {
            tracing::warn!("Stream {} had no mapping to release: {}", stream_id, e);
        }
        Ok(())
    }

    /// Re-route a running stream.
    ///
    /// The router is updated first; the stream then stops, takes the new
    /// mapping and restarts if it was running.
    pub fn update_mapping(&self, mapping: ChannelMapping) -> Result<()> {
        let stream_id = mapping.stream_id;
        let mut streams = self.streams.lock();
        let stream = streams
            .get_mut(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;

        self.context
            .router(stream.direction())
            .update_mapping(mapping.clone())?;
        stream.update_mapping(mapping)
    }

    pub fn statistics(&self, stream_id: StreamId) -> Option<StreamStatistics> {
        self.streams.lock().get(&stream_id).map(ManagedStream::statistics)
    }

    pub fn reset_statistics(&self, stream_id: StreamId) -> Result<()> {
        self.streams
            .lock()
            .get(&stream_id)
            .map(ManagedStream::reset_statistics)
            .ok_or(Error::StreamNotFound(stream_id))
    }

    pub fn status(&self, stream_id: StreamId) -> Option<StreamStatus> {
        self.streams.lock().get(&stream_id).map(ManagedStream::status)
    }

    pub fn all_status(&self) -> Vec<StreamStatus> {
        self.streams.lock().values().map(ManagedStream::status).collect()
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.lock().keys().copied().collect()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Persistable snapshot of one direction's routing table
    pub fn routing_state(&self, direction: StreamDirection) -> RoutingState {
        self.context.router(direction).to_state()
    }

    /// Replace one direction's routing table.
    ///
    /// Only allowed while no stream of that direction is running, since
    /// running streams hold their own copy of their mapping.
    pub fn restore_routing(
        &self,
        direction: StreamDirection,
        state: &RoutingState,
    ) -> Result<usize> {
        let streams = self.streams.lock();
        let active = streams
            .values()
            .filter(|s| s.direction() == direction)
            .count();
        if active > 0 {
            return Err(RoutingError::StreamsActive(active).into());
        }
        Ok(self.context.router(direction).restore(state))
    }

    /// Stop and remove every stream
    pub fn stop_all(&self) {
        let drained: Vec<_> = std::mem::take(&mut *self.streams.lock()).into_iter().collect();
        for (stream_id, mut stream) in drained {
            stream.stop();
            let _ = self.context.router(stream.direction()).remove_mapping(stream_id);
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
