//! RTP stream receiver
//!
//! A dedicated thread polls a non-blocking socket, validates each datagram
//! and de-interleaves the decoded frames into the device's receive queues.
//! [`PacketProcessor`] holds everything after the socket so it can be driven
//! without one.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::VirtualDevice;
use crate::codec::AudioEncoding;
use crate::config::{NetworkConfig, StreamConfig};
use crate::constants::MAX_DATAGRAM_SIZE;
use crate::context::EngineContext;
use crate::error::{ConfigError, NetworkError, PacketError, Result};
use crate::network::stats::{StreamStatistics, StreamStats};
use crate::network::udp::PacketTransport;
use crate::network::{resolve_routes, ChannelRoute, StopToken};
use crate::protocol::{RtpPacket, SequenceEvent, SequenceTracker, RTP_VERSION};
use crate::routing::{ChannelMapping, StreamId};

/// Validates, decodes and routes incoming packets for one stream
pub struct PacketProcessor {
    payload_type: u8,
    encoding: AudioEncoding,
    stream_channels: usize,
    max_frames: usize,
    max_payload: usize,
    routes: Vec<ChannelRoute>,
    sequence: SequenceTracker,
    /// Interleaved samples of the current packet
    decoded: Vec<f32>,
    /// One channel's samples of the current packet
    channel: Vec<f32>,
    stats: Arc<StreamStats>,
}

impl PacketProcessor {
    /// Resolve the mapping against the device and size all scratch space
    pub fn new(
        config: &StreamConfig,
        mapping: &ChannelMapping,
        device: &VirtualDevice,
        network: &NetworkConfig,
        stats: Arc<StreamStats>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let encoding = config.audio_encoding()?;
        let stream_channels = config.channel_count;
        let max_frames = network.max_frames_per_packet.max(1);

        let routes = resolve_routes(mapping, stream_channels, |ch| device.receive_queue(ch));
        if routes.is_empty() {
            tracing::warn!("{}: no device channels routed, packets will be dropped", config.name);
        }

        Ok(Self {
            payload_type: config.payload_type,
            encoding,
            stream_channels,
            max_frames,
            max_payload: network.max_payload_bytes,
            routes,
            sequence: SequenceTracker::new(),
            decoded: vec![0.0; max_frames * stream_channels],
            channel: vec![0.0; max_frames],
            stats,
        })
    }

    /// Handle one datagram, returning the number of frames delivered.
    ///
    /// A rejected packet bumps only the malformed counter.
    pub fn process(&mut self, datagram: &[u8]) -> std::result::Result<usize, PacketError> {
        let result = self.deliver(datagram);
        if let Err(e) = &result {
            self.stats.record_malformed();
            tracing::trace!("Dropped packet: {}", e);
        }
        result
    }

    fn deliver(&mut self, datagram: &[u8]) -> std::result::Result<usize, PacketError> {
        let packet = RtpPacket::parse(datagram)?;
        let header = packet.header;

        if header.version != RTP_VERSION {
            return Err(PacketError::BadVersion(header.version));
        }
        if header.payload_type != self.payload_type {
            return Err(PacketError::PayloadTypeMismatch {
                expected: self.payload_type,
                actual: header.payload_type,
            });
        }

        let len = packet.payload.len();
        if len == 0 {
            return Err(PacketError::EmptyPayload);
        }
        if len > self.max_payload {
            return Err(PacketError::PayloadTooLarge(len));
        }

        let frame_size = self.encoding.bytes_per_sample() * self.stream_channels;
        if len % frame_size != 0 {
            return Err(PacketError::PartialFrame { len, frame_size });
        }
        let frames = len / frame_size;
        if frames == 0 || frames > self.max_frames {
            return Err(PacketError::FrameCount {
                frames,
                max: self.max_frames,
            });
        }

        let samples = frames * self.stream_channels;
        self.encoding
            .decode(packet.payload, &mut self.decoded[..samples])
            .map_err(|_| PacketError::PartialFrame { len, frame_size })?;

        if let SequenceEvent::Gap(lost) = self.sequence.observe(header.sequence_number) {
            self.stats.record_lost(lost as u64);
            tracing::trace!("Gap of {} packets before seq {}", lost, header.sequence_number);
        }
        self.stats.record_received(datagram.len());

        let mut short = false;
        for route in &self.routes {
            for (frame, slot) in self.channel[..frames].iter_mut().enumerate() {
                *slot = self.decoded[frame * self.stream_channels + route.stream_channel];
            }
            if route.queue.write(&self.channel[..frames]) < frames {
                short = true;
            }
        }
        if short {
            self.stats.record_underrun();
        }

        Ok(frames)
    }

    /// Forget sequence history, e.g. after a restart
    pub fn reset_sequence(&mut self) {
        self.sequence.reset();
    }

    pub fn routed_channels(&self) -> usize {
        self.routes.len()
    }
}

/// Receives one RTP stream into the device's receive queues
pub struct StreamReceiver {
    stream_id: StreamId,
    config: StreamConfig,
    mapping: ChannelMapping,
    device: Arc<VirtualDevice>,
    network: NetworkConfig,
    stats: Arc<StreamStats>,
    stop: StopToken,
    thread_handle: Option<JoinHandle<()>>,
}

impl StreamReceiver {
    pub fn new(context: &EngineContext, config: StreamConfig, mapping: ChannelMapping) -> Self {
        Self {
            stream_id: mapping.stream_id,
            config,
            mapping,
            device: Arc::clone(&context.device),
            network: context.network.clone(),
            stats: Arc::new(StreamStats::new()),
            stop: StopToken::new(),
            thread_handle: None,
        }
    }

    /// Open the socket and spawn the receive thread
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(NetworkError::AlreadyRunning.into());
        }

        let processor = PacketProcessor::new(
            &self.config,
            &self.mapping,
            &self.device,
            &self.network,
            Arc::clone(&self.stats),
        )?;
        let transport = PacketTransport::receiver(self.config.socket_addr()?, &self.network)?;

        let stop = StopToken::new();
        self.stop = stop.clone();
        let poll_interval = self.network.poll_interval();
        let name = self.config.name.clone();

        let handle = thread::Builder::new()
            .name(format!("rtp-rx-{}", self.config.name))
            .spawn(move || receive_loop(processor, transport, stop, poll_interval, &name))
            .map_err(|e| NetworkError::Thread(e.to_string()))?;
        self.thread_handle = Some(handle);

        tracing::info!(
            "Receiving '{}' from {}:{} ({} ch {}, {})",
            self.config.name,
            self.config.address,
            self.config.port,
            self.config.channel_count,
            self.config.encoding,
            self.mapping
        );
        Ok(())
    }

    /// Signal the thread and wait for it; safe to call repeatedly
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Receive thread for '{}' panicked", self.config.name);
            }
            tracing::info!("Stopped receiving '{}'", self.config.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Whether a packet arrived within the liveness window
    pub fn is_connected(&self) -> bool {
        self.is_running()
            && self
                .stats
                .since_last_packet()
                .map(|age| age <= self.network.liveness_window())
                .unwrap_or(false)
    }

    pub fn statistics(&self) -> StreamStatistics {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Swap the mapping, restarting the thread if it was running
    pub fn update_mapping(&mut self, mapping: ChannelMapping) -> Result<()> {
        let was_running = self.is_running();
        self.stop();
        self.mapping = mapping;
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn mapping(&self) -> &ChannelMapping {
        &self.mapping
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    mut processor: PacketProcessor,
    transport: PacketTransport,
    stop: StopToken,
    poll_interval: std::time::Duration,
    name: &str,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while !stop.is_stopped() {
        match transport.try_recv(&mut buf) {
            Ok(Some(len)) => {
                // Errors are counted inside the processor
                let _ = processor.process(&buf[..len]);
            }
            Ok(None) => thread::sleep(poll_interval),
            Err(e) => {
                tracing::debug!("{}: receive error: {}", name, e);
                thread::sleep(poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::protocol::{RtpHeader, DEFAULT_PAYLOAD_TYPE, RTP_HEADER_SIZE};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::{Duration, Instant};

    fn setup(
        channels: usize,
        mapping: ChannelMapping,
    ) -> (PacketProcessor, Arc<VirtualDevice>, Arc<StreamStats>) {
        let device = Arc::new(VirtualDevice::new(8, 8, 64));
        let config = StreamConfig::new("test", "239.1.1.1", 5004, channels)
            .with_encoding(AudioEncoding::L16);
        let stats = Arc::new(StreamStats::new());
        let processor = PacketProcessor::new(
            &config,
            &mapping,
            &device,
            &NetworkConfig::default(),
            Arc::clone(&stats),
        )
        .unwrap();
        (processor, device, stats)
    }

    fn packet(seq: u16, samples: &[f32]) -> Vec<u8> {
        let mut data = vec![0u8; RTP_HEADER_SIZE + samples.len() * 2];
        RtpHeader::new(DEFAULT_PAYLOAD_TYPE, seq, seq as u32 * 2, 7)
            .write_to(&mut data)
            .unwrap();
        AudioEncoding::L16
            .encode(samples, &mut data[RTP_HEADER_SIZE..])
            .unwrap();
        data
    }

    fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn l16_stream(name: &str, address: &str, port: u16) -> StreamConfig {
        StreamConfig::new(name, address, port, 1).with_encoding(AudioEncoding::L16)
    }

    #[test]
    fn test_deinterleave_into_mapped_queues() {
        let mapping = ChannelMapping::custom(StreamId::generate(), "t", vec![5, 2]);
        let (mut processor, device, stats) = setup(2, mapping);

        // Two frames: (L0, R0), (L1, R1)
        let frames = processor.process(&packet(1, &[0.5, -0.5, 0.25, -0.25])).unwrap();
        assert_eq!(frames, 2);

        let mut out = [0.0f32; 4];
        assert_eq!(device.receive_queue(5).unwrap().read(&mut out), 2);
        assert!((out[0] - 0.5).abs() < 1e-3 && (out[1] - 0.25).abs() < 1e-3);
        assert_eq!(device.receive_queue(2).unwrap().read(&mut out), 2);
        assert!((out[0] + 0.5).abs() < 1e-3 && (out[1] + 0.25).abs() < 1e-3);
        assert!(device.receive_queue(0).unwrap().is_empty());

        assert_eq!(stats.snapshot().packets_received, 1);
    }

    #[test]
    fn test_stream_offset_selects_source_channel() {
        let mapping =
            ChannelMapping::sequential(StreamId::generate(), "t", 1, 4).with_stream_offset(1);
        let (mut processor, device, _) = setup(2, mapping);

        processor.process(&packet(1, &[0.1, 0.9])).unwrap();
        let mut out = [0.0f32; 1];
        device.receive_queue(4).unwrap().read(&mut out);
        assert!((out[0] - 0.9).abs() < 1e-3);
    }

    #[test]
    fn test_sequence_gap_counts_lost() {
        let mapping = ChannelMapping::sequential(StreamId::generate(), "t", 1, 0);
        let (mut processor, _, stats) = setup(1, mapping);

        for seq in [5u16, 6, 9] {
            processor.process(&packet(seq, &[0.0])).unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 3);
        assert_eq!(snap.packets_lost, 2);
    }

    #[test]
    fn test_bad_version_only_counts_malformed() {
        let mapping = ChannelMapping::sequential(StreamId::generate(), "t", 1, 0);
        let (mut processor, device, stats) = setup(1, mapping);

        processor.process(&packet(1, &[0.0])).unwrap();

        let mut bad = packet(2, &[0.3]);
        bad[0] = (bad[0] & 0x3F) | (1 << 6);
        assert_eq!(processor.process(&bad), Err(PacketError::BadVersion(1)));

        let snap = stats.snapshot();
        assert_eq!(snap.packets_malformed, 1);
        assert_eq!(snap.packets_received, 1);
        assert_eq!(snap.packets_lost, 0);
        assert_eq!(device.receive_queue(0).unwrap().available(), 1);

        // The rejected packet did not advance the sequence expectation
        processor.process(&packet(2, &[0.0])).unwrap();
        assert_eq!(stats.snapshot().packets_lost, 0);
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        let mapping = ChannelMapping::sequential(StreamId::generate(), "t", 2, 0);
        let (mut processor, _, stats) = setup(2, mapping);

        // Header only
        let empty = packet(1, &[]);
        assert_eq!(processor.process(&empty), Err(PacketError::EmptyPayload));

        // 3 L16 samples for a 2-channel stream
        let partial = packet(2, &[0.0, 0.0, 0.0]);
        assert!(matches!(processor.process(&partial), Err(PacketError::PartialFrame { .. })));

        let mut wrong_pt = packet(3, &[0.0, 0.0]);
        wrong_pt[1] = 0x0B;
        assert!(matches!(
            processor.process(&wrong_pt),
            Err(PacketError::PayloadTypeMismatch { expected: 96, actual: 11 })
        ));

        assert_eq!(processor.process(&[0x80, 0x60]), Err(PacketError::TooShort(2)));

        // 1440 bytes of payload plus one frame
        let too_big = packet(4, &vec![0.0; 722]);
        assert_eq!(processor.process(&too_big), Err(PacketError::PayloadTooLarge(1444)));

        let snap = stats.snapshot();
        assert_eq!(snap.packets_malformed, 5);
        assert_eq!(snap.packets_received, 0);
    }

    #[test]
    fn test_frame_count_limit() {
        let device = Arc::new(VirtualDevice::new(2, 2, 64));
        let config = l16_stream("t", "239.1.1.1", 5004);
        let network = NetworkConfig {
            max_frames_per_packet: 4,
            ..NetworkConfig::default()
        };
        let mapping = ChannelMapping::sequential(StreamId::generate(), "t", 1, 0);
        let stats = Arc::new(StreamStats::new());
        let mut processor =
            PacketProcessor::new(&config, &mapping, &device, &network, stats).unwrap();

        assert_eq!(processor.process(&packet(1, &[0.0; 4])), Ok(4));
        assert_eq!(
            processor.process(&packet(2, &[0.0; 5])),
            Err(PacketError::FrameCount { frames: 5, max: 4 })
        );
    }

    #[test]
    fn test_full_queue_counts_one_underrun_per_packet() {
        let mapping = ChannelMapping::sequential(StreamId::generate(), "t", 2, 0);
        let (mut processor, _, stats) = setup(2, mapping);

        // Queues hold 64 samples; 40 frames fit once, the second packet is short
        let samples = vec![0.1f32; 80];
        processor.process(&packet(1, &samples)).unwrap();
        processor.process(&packet(2, &samples)).unwrap();

        assert_eq!(stats.snapshot().buffer_underruns, 1);
    }

    #[test]
    fn test_receiver_stop_is_idempotent() {
        let ctx = EngineContext::new(&AppConfig::default());
        let config = StreamConfig::new("idle", "127.0.0.1", 46_021, 2);
        let mapping = ChannelMapping::sequential(StreamId::generate(), "idle", 2, 0);
        let mut receiver = StreamReceiver::new(&ctx, config, mapping);

        assert!(!receiver.is_running());
        receiver.stop();
        receiver.start().unwrap();
        assert!(receiver.is_running());
        assert!(!receiver.is_connected());
        assert!(matches!(
            receiver.start(),
            Err(crate::Error::Network(NetworkError::AlreadyRunning))
        ));
        receiver.stop();
        receiver.stop();
        assert!(!receiver.is_running());
    }

    #[test]
    fn test_shared_port_receivers_keep_their_own_group() {
        let ctx = EngineContext::new(&AppConfig::default());
        let port = 46_620;
        let group_a = Ipv4Addr::new(239, 77, 2, 1);

        let mut a = StreamReceiver::new(
            &ctx,
            l16_stream("grp-a", "239.77.2.1", port),
            ChannelMapping::sequential(StreamId::generate(), "grp-a", 1, 0),
        );
        let mut b = StreamReceiver::new(
            &ctx,
            l16_stream("grp-b", "239.77.2.2", port),
            ChannelMapping::sequential(StreamId::generate(), "grp-b", 1, 1),
        );
        a.start().unwrap();
        b.start().unwrap();

        let tx = PacketTransport::sender(&ctx.network).unwrap();
        for seq in 1..=20u16 {
            tx.send_to(&packet(seq, &[0.5; 48]), SocketAddrV4::new(group_a, port))
                .unwrap();
        }

        assert!(wait_for(Duration::from_secs(2), || {
            a.statistics().packets_received == 20
        }));
        thread::sleep(Duration::from_millis(50));

        let other = b.statistics();
        assert_eq!(other.packets_received, 0);
        assert_eq!(other.packets_malformed, 0);
        assert_eq!(ctx.device.receive_queue(0).unwrap().available(), 960);
        assert!(ctx.device.receive_queue(1).unwrap().is_empty());
        assert!(!b.is_connected());
    }

    #[test]
    fn test_connection_expires_after_liveness_window() {
        let mut app = AppConfig::default();
        app.network.liveness_ms = 200;
        let ctx = EngineContext::new(&app);
        let port = 46_630;
        let mut receiver = StreamReceiver::new(
            &ctx,
            l16_stream("live", "127.0.0.1", port),
            ChannelMapping::sequential(StreamId::generate(), "live", 1, 0),
        );
        receiver.start().unwrap();

        let tx = PacketTransport::sender(&ctx.network).unwrap();
        tx.send_to(&packet(1, &[0.1; 48]), SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
            .unwrap();
        assert!(wait_for(Duration::from_secs(2), || receiver.is_connected()));

        // Clearing the counters does not drop a live stream
        receiver.reset_statistics();
        assert_eq!(receiver.statistics().packets_received, 0);
        assert!(receiver.is_connected());

        thread::sleep(Duration::from_millis(500));
        assert!(receiver.is_running());
        assert!(!receiver.is_connected());
    }
}
