//! Authoritative stream-to-device channel assignment
//!
//! The router keeps two views under one lock: the mapping collection keyed
//! by stream id, and a fixed array of optional owners, one per device
//! channel, for O(1) reverse lookup. Both are only ever changed together.
//!
//! The lock is taken at stream setup, teardown and reconfiguration. Network
//! threads and the device callback never touch it; each stream works from
//! its own resolved copy of its mapping.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use crate::constants::DEVICE_CHANNEL_COUNT;
use crate::error::RoutingError;
use crate::routing::mapping::{ChannelMapping, StreamId};
use crate::routing::persist::{MappingRecord, RoutingState};

struct RouterState {
    mappings: BTreeMap<StreamId, ChannelMapping>,
    owners: [Option<StreamId>; DEVICE_CHANNEL_COUNT],
}

impl RouterState {
    fn new() -> Self {
        Self {
            mappings: BTreeMap::new(),
            owners: [None; DEVICE_CHANNEL_COUNT],
        }
    }

    /// First channel claimed by `mapping` that another stream owns
    fn find_conflict(&self, mapping: &ChannelMapping) -> Option<(usize, StreamId)> {
        in_range(mapping).find_map(|ch| match self.owners[ch] {
            Some(owner) if owner != mapping.stream_id => Some((ch, owner)),
            _ => None,
        })
    }

    fn claim(&mut self, mapping: &ChannelMapping) {
        for ch in in_range(mapping) {
            self.owners[ch] = Some(mapping.stream_id);
        }
    }

    fn release(&mut self, stream_id: StreamId) {
        for owner in self.owners.iter_mut() {
            if *owner == Some(stream_id) {
                *owner = None;
            }
        }
    }
}

/// Out-of-range custom entries are ignored when applying ownership
fn in_range(mapping: &ChannelMapping) -> impl Iterator<Item = usize> + '_ {
    mapping
        .device_channels()
        .filter(|&ch| ch < DEVICE_CHANNEL_COUNT)
}

/// Routing table for one 128-channel device surface
pub struct ChannelRouter {
    state: Mutex<RouterState>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RouterState::new()),
        }
    }

    /// Check a mapping on its own, without looking at current ownership
    pub fn validate_mapping(&self, mapping: &ChannelMapping) -> Result<(), RoutingError> {
        mapping.validate()
    }

    /// Commit a new mapping.
    ///
    /// Fails if the mapping is invalid, if the stream is already mapped, or
    /// if any target channel belongs to another stream. A failed call leaves
    /// the table untouched.
    pub fn add_mapping(&self, mapping: ChannelMapping) -> Result<(), RoutingError> {
        mapping.validate()?;

        let mut state = self.state.lock();
        if state.mappings.contains_key(&mapping.stream_id) {
            return Err(RoutingError::AlreadyMapped(mapping.stream_id));
        }
        if let Some((channel, owner)) = state.find_conflict(&mapping) {
            tracing::warn!(
                "Rejected mapping {}: device channel {} owned by {}",
                mapping,
                channel,
                owner
            );
            return Err(RoutingError::Overlap { channel, owner });
        }

        state.claim(&mapping);
        tracing::info!("Added mapping {}", mapping);
        state.mappings.insert(mapping.stream_id, mapping);
        Ok(())
    }

    /// Remove a stream's mapping and free its channels
    pub fn remove_mapping(&self, stream_id: StreamId) -> Result<ChannelMapping, RoutingError> {
        let mut state = self.state.lock();
        let mapping = state
            .mappings
            .remove(&stream_id)
            .ok_or(RoutingError::UnknownStream(stream_id))?;

        state.release(stream_id);
        tracing::info!("Removed mapping {}", mapping);
        Ok(mapping)
    }

    /// Replace a stream's mapping, returning the previous one.
    ///
    /// Overlap is checked against every stream except the one being updated,
    /// so a mapping may move onto channels it already owns.
    pub fn update_mapping(&self, mapping: ChannelMapping) -> Result<ChannelMapping, RoutingError> {
        mapping.validate()?;

        let mut state = self.state.lock();
        let previous = match state.mappings.get(&mapping.stream_id) {
            Some(previous) => previous.clone(),
            None => return Err(RoutingError::UnknownStream(mapping.stream_id)),
        };
        if let Some((channel, owner)) = state.find_conflict(&mapping) {
            tracing::warn!(
                "Rejected update {}: device channel {} owned by {}",
                mapping,
                channel,
                owner
            );
            return Err(RoutingError::Overlap { channel, owner });
        }

        state.release(mapping.stream_id);
        state.claim(&mapping);
        tracing::info!("Updated mapping {}", mapping);
        state.mappings.insert(mapping.stream_id, mapping);
        Ok(previous)
    }

    /// Propose a sequential mapping on the first free run of `channel_count`
    /// channels, scanning up from channel 0.
    ///
    /// Free channels are not defragmented: this returns `None` when no single
    /// run is long enough even if the total free count would suffice. The
    /// mapping is not committed.
    pub fn create_default_mapping(
        &self,
        stream_id: StreamId,
        name: &str,
        channel_count: usize,
    ) -> Option<ChannelMapping> {
        if channel_count == 0 || channel_count > DEVICE_CHANNEL_COUNT {
            return None;
        }

        let state = self.state.lock();
        let mut run_start = 0;
        let mut run_len = 0;
        for (ch, owner) in state.owners.iter().enumerate() {
            if owner.is_some() {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = ch;
            }
            run_len += 1;
            if run_len == channel_count {
                return Some(ChannelMapping::sequential(
                    stream_id,
                    name,
                    channel_count,
                    run_start,
                ));
            }
        }

        tracing::debug!(
            "No contiguous run of {} free device channels for {}",
            channel_count,
            name
        );
        None
    }

    /// Owner of a device channel
    pub fn stream_for_device_channel(&self, channel: usize) -> Option<StreamId> {
        if channel >= DEVICE_CHANNEL_COUNT {
            return None;
        }
        self.state.lock().owners[channel]
    }

    /// Device channels with no owner, ascending
    pub fn unassigned_device_channels(&self) -> Vec<usize> {
        let state = self.state.lock();
        state
            .owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| owner.is_none())
            .map(|(ch, _)| ch)
            .collect()
    }

    /// Streams, other than the mapping's own, owning any channel it claims
    pub fn overlapping_streams(&self, mapping: &ChannelMapping) -> Vec<StreamId> {
        let state = self.state.lock();
        in_range(mapping)
            .filter_map(|ch| state.owners[ch])
            .filter(|owner| *owner != mapping.stream_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Mapping for one stream
    pub fn mapping(&self, stream_id: StreamId) -> Option<ChannelMapping> {
        self.state.lock().mappings.get(&stream_id).cloned()
    }

    /// Every committed mapping, ordered by stream id
    pub fn all_mappings(&self) -> Vec<ChannelMapping> {
        self.state.lock().mappings.values().cloned().collect()
    }

    /// Number of committed mappings
    pub fn mapping_count(&self) -> usize {
        self.state.lock().mappings.len()
    }

    /// Remove every mapping
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = RouterState::new();
    }

    /// Snapshot of the table in its persisted form
    pub fn to_state(&self) -> RoutingState {
        let state = self.state.lock();
        RoutingState::new(state.mappings.values().map(MappingRecord::from).collect())
    }

    /// Replace the table with a persisted one.
    ///
    /// Records that do not parse, fail validation or collide with an
    /// earlier record are skipped. Returns the number restored.
    pub fn restore(&self, routing: &RoutingState) -> usize {
        self.clear();

        let mut restored = 0;
        for record in &routing.mappings {
            let mapping = match ChannelMapping::try_from(record) {
                Ok(mapping) => mapping,
                Err(e) => {
                    tracing::warn!("Skipping persisted mapping '{}': {}", record.name, e);
                    continue;
                }
            };
            match self.add_mapping(mapping) {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!("Skipping persisted mapping '{}': {}", record.name, e),
            }
        }

        tracing::info!(
            "Restored {}/{} persisted mappings",
            restored,
            routing.mappings.len()
        );
        restored
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(count: usize, start: usize) -> ChannelMapping {
        ChannelMapping::sequential(StreamId::generate(), "test", count, start)
    }

    #[test]
    fn test_add_and_lookup() {
        let router = ChannelRouter::new();
        let m = seq(8, 16);
        let id = m.stream_id;
        router.add_mapping(m).unwrap();

        for ch in 16..24 {
            assert_eq!(router.stream_for_device_channel(ch), Some(id));
        }
        assert_eq!(router.stream_for_device_channel(15), None);
        assert_eq!(router.stream_for_device_channel(24), None);
        assert_eq!(router.stream_for_device_channel(500), None);
        assert_eq!(router.unassigned_device_channels().len(), 120);
    }

    #[test]
    fn test_overlap_rejected_without_side_effects() {
        let router = ChannelRouter::new();
        let first = seq(4, 0);
        let first_id = first.stream_id;
        router.add_mapping(first).unwrap();

        let before = router.unassigned_device_channels();
        let err = router.add_mapping(seq(4, 2)).unwrap_err();
        assert_eq!(
            err,
            RoutingError::Overlap {
                channel: 2,
                owner: first_id
            }
        );
        assert_eq!(router.unassigned_device_channels(), before);
        assert_eq!(router.mapping_count(), 1);
    }

    #[test]
    fn test_duplicate_stream_rejected() {
        let router = ChannelRouter::new();
        let m = seq(2, 0);
        router.add_mapping(m.clone()).unwrap();

        let mut moved = m.clone();
        moved.device_channel_start = 50;
        assert_eq!(
            router.add_mapping(moved),
            Err(RoutingError::AlreadyMapped(m.stream_id))
        );
    }

    #[test]
    fn test_remove() {
        let router = ChannelRouter::new();
        let m = seq(4, 10);
        let id = m.stream_id;
        router.add_mapping(m).unwrap();

        router.remove_mapping(id).unwrap();
        assert_eq!(router.unassigned_device_channels().len(), DEVICE_CHANNEL_COUNT);
        assert_eq!(
            router.remove_mapping(id),
            Err(RoutingError::UnknownStream(id))
        );
    }

    #[test]
    fn test_update_may_overlap_itself() {
        let router = ChannelRouter::new();
        let m = seq(4, 0);
        let id = m.stream_id;
        router.add_mapping(m.clone()).unwrap();

        let mut shifted = m.clone();
        shifted.device_channel_start = 2;
        let previous = router.update_mapping(shifted).unwrap();
        assert_eq!(previous.device_channel_start, 0);

        assert_eq!(router.stream_for_device_channel(0), None);
        assert_eq!(router.stream_for_device_channel(1), None);
        assert_eq!(router.stream_for_device_channel(5), Some(id));
    }

    #[test]
    fn test_update_conflict_keeps_old_mapping() {
        let router = ChannelRouter::new();
        let a = seq(4, 0);
        let b = seq(4, 8);
        let b_id = b.stream_id;
        router.add_mapping(a.clone()).unwrap();
        router.add_mapping(b).unwrap();

        let mut moved = a.clone();
        moved.device_channel_start = 6;
        assert!(matches!(
            router.update_mapping(moved),
            Err(RoutingError::Overlap { channel: 8, owner }) if owner == b_id
        ));
        assert_eq!(router.mapping(a.stream_id), Some(a.clone()));
        assert_eq!(router.stream_for_device_channel(0), Some(a.stream_id));

        assert!(matches!(
            router.update_mapping(seq(2, 100)),
            Err(RoutingError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_default_mapping_first_fit() {
        let router = ChannelRouter::new();
        let m = router
            .create_default_mapping(StreamId::generate(), "first", 100)
            .unwrap();
        assert_eq!(m.device_channel_start, 0);
        router.add_mapping(m).unwrap();

        let next = router
            .create_default_mapping(StreamId::generate(), "next", 8)
            .unwrap();
        assert_eq!(next.device_channel_start, 100);
        assert_eq!(next.device_channel_count, 8);
        // Proposals are not committed
        assert_eq!(router.mapping_count(), 1);
    }

    #[test]
    fn test_default_mapping_does_not_defragment() {
        let router = ChannelRouter::new();
        // Own every even channel: 64 free channels, none adjacent
        for ch in (0..DEVICE_CHANNEL_COUNT).step_by(2) {
            router.add_mapping(seq(1, ch)).unwrap();
        }
        assert_eq!(router.unassigned_device_channels().len(), 64);
        assert!(router
            .create_default_mapping(StreamId::generate(), "x", 8)
            .is_none());
        assert!(router
            .create_default_mapping(StreamId::generate(), "x", 1)
            .is_some());
    }

    #[test]
    fn test_default_mapping_bounds() {
        let router = ChannelRouter::new();
        let id = StreamId::generate();
        assert!(router.create_default_mapping(id, "x", 0).is_none());
        assert!(router.create_default_mapping(id, "x", 129).is_none());
        assert_eq!(
            router
                .create_default_mapping(id, "x", 128)
                .unwrap()
                .device_channel_start,
            0
        );
    }

    #[test]
    fn test_custom_mapping_ownership() {
        let router = ChannelRouter::new();
        let id = StreamId::generate();
        router
            .add_mapping(ChannelMapping::custom(id, "c", vec![5, 90, 300]))
            .unwrap();

        assert_eq!(router.stream_for_device_channel(5), Some(id));
        assert_eq!(router.stream_for_device_channel(90), Some(id));
        assert_eq!(router.stream_for_device_channel(6), None);
        // The out-of-range entry claims nothing
        assert_eq!(router.unassigned_device_channels().len(), 126);
    }

    #[test]
    fn test_overlapping_streams() {
        let router = ChannelRouter::new();
        let a = seq(4, 0);
        let b = seq(4, 4);
        let (a_id, b_id) = (a.stream_id, b.stream_id);
        router.add_mapping(a.clone()).unwrap();
        router.add_mapping(b).unwrap();

        let candidate = seq(8, 2);
        assert_eq!(router.overlapping_streams(&candidate), {
            let mut ids = vec![a_id, b_id];
            ids.sort();
            ids
        });
        // A mapping never overlaps itself
        assert!(router.overlapping_streams(&a).is_empty());
    }

    #[test]
    fn test_state_roundtrip() {
        let router = ChannelRouter::new();
        router.add_mapping(seq(2, 0)).unwrap();
        router
            .add_mapping(seq(4, 10).with_stream_offset(2))
            .unwrap();

        let state = router.to_state();
        let other = ChannelRouter::new();
        other.add_mapping(seq(1, 127)).unwrap();
        assert_eq!(other.restore(&state), 2);
        assert_eq!(other.all_mappings(), router.all_mappings());
        assert_eq!(other.stream_for_device_channel(127), None);
    }

    #[test]
    fn test_restore_skips_overflowing_record() {
        let live = StreamId::generate();
        let json = format!(
            r#"{{"version":1,"mappings":[
                {{"stream_id":"{}","name":"huge","stream_channel_count":2,
                  "device_channel_start":1,"device_channel_count":{}}},
                {{"stream_id":"{}","name":"live","stream_channel_count":4,
                  "device_channel_start":0,"device_channel_count":4}}]}}"#,
            StreamId::generate(),
            usize::MAX,
            live
        );
        let state = RoutingState::from_json(&json).unwrap();

        let router = ChannelRouter::new();
        assert_eq!(router.restore(&state), 1);
        assert_eq!(router.mapping_count(), 1);
        for ch in 0..4 {
            assert_eq!(router.stream_for_device_channel(ch), Some(live));
        }
        assert_eq!(router.unassigned_device_channels().len(), DEVICE_CHANNEL_COUNT - 4);
    }
}
