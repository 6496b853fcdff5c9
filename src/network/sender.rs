//! RTP stream transmitter
//!
//! A paced thread wakes once per packet time, pulls one packet's worth of
//! frames from the device's transmit queues, interleaves and encodes them
//! and sends the result best-effort. Deadlines are absolute so sleep jitter
//! does not accumulate.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::VirtualDevice;
use crate::clock::MediaClock;
use crate::codec::AudioEncoding;
use crate::config::{NetworkConfig, StreamConfig};
use crate::context::EngineContext;
use crate::error::{CodecError, ConfigError, NetworkError, Result};
use crate::network::stats::{StreamStatistics, StreamStats};
use crate::network::udp::PacketTransport;
use crate::network::{resolve_routes, ChannelRoute, StopToken};
use crate::protocol::{RtpHeader, RTP_HEADER_SIZE};
use crate::routing::{ChannelMapping, StreamId};

/// Re-anchor the schedule when this many packet intervals behind
const MAX_LAG_INTERVALS: u32 = 100;

/// Absolute send deadlines counted in frames, so rates that do not divide
/// the packet time evenly still send exactly `sample_rate` frames a second
#[derive(Debug, Clone)]
struct PacketSchedule {
    anchor: Instant,
    /// Frames sent once the pending packet is out
    frames_due: u64,
    frames: u64,
    sample_rate: u64,
}

impl PacketSchedule {
    fn new(anchor: Instant, frames: usize, sample_rate: u32) -> Self {
        Self {
            anchor,
            frames_due: frames as u64,
            frames: frames as u64,
            sample_rate: sample_rate.max(1) as u64,
        }
    }

    fn deadline(&self) -> Instant {
        let nanos = self.frames_due as u128 * 1_000_000_000 / self.sample_rate as u128;
        self.anchor + Duration::from_nanos(nanos as u64)
    }

    fn advance(&mut self) {
        self.frames_due += self.frames;
    }

    /// Send the pending packet at `now` and pace from there
    fn reanchor(&mut self, now: Instant) {
        self.anchor = now;
        self.frames_due = 0;
    }
}

/// Assembles outgoing packets from the transmit queues
pub struct PacketBuilder {
    encoding: AudioEncoding,
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    marker_pending: bool,
    stream_channels: usize,
    frames: usize,
    routes: Vec<ChannelRoute>,
    channel: Vec<f32>,
    interleaved: Vec<f32>,
    packet: Vec<u8>,
    stats: Arc<StreamStats>,
}

impl PacketBuilder {
    /// Resolve the mapping and size the packet buffer.
    ///
    /// Fails if the packet time or payload size falls outside the
    /// configured limits.
    pub fn new(
        config: &StreamConfig,
        mapping: &ChannelMapping,
        device: &VirtualDevice,
        network: &NetworkConfig,
        ssrc: u32,
        stats: Arc<StreamStats>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let encoding = config.audio_encoding()?;
        let frames = config.checked_frames_per_packet(network.max_frames_per_packet)?;
        let stream_channels = config.channel_count;

        let payload = encoding.payload_size(frames, stream_channels);
        if payload > network.max_payload_bytes {
            return Err(ConfigError::PayloadSize {
                bytes: payload,
                max: network.max_payload_bytes,
            });
        }

        let routes = resolve_routes(mapping, stream_channels, |ch| device.transmit_queue(ch));

        Ok(Self {
            encoding,
            payload_type: config.payload_type,
            ssrc,
            sequence: 0,
            timestamp: 0,
            marker_pending: true,
            stream_channels,
            frames,
            routes,
            channel: vec![0.0; frames],
            interleaved: vec![0.0; frames * stream_channels],
            packet: vec![0u8; RTP_HEADER_SIZE + payload],
            stats,
        })
    }

    /// Position the stream; the next packet carries the marker bit
    pub fn start_at(&mut self, sequence: u16, timestamp: u32) {
        self.sequence = sequence;
        self.timestamp = timestamp;
        self.marker_pending = true;
    }

    /// Build the next packet.
    ///
    /// Channels whose queue runs short are padded with silence, counted as
    /// one overrun for the whole packet.
    pub fn next_packet(&mut self) -> std::result::Result<&[u8], CodecError> {
        let frames = self.frames;
        self.interleaved.fill(0.0);

        let mut short = false;
        for route in &self.routes {
            let got = route.queue.read(&mut self.channel[..frames]);
            if got < frames {
                short = true;
                self.channel[got..frames].fill(0.0);
            }
            for (frame, &sample) in self.channel[..frames].iter().enumerate() {
                self.interleaved[frame * self.stream_channels + route.stream_channel] = sample;
            }
        }
        if short {
            self.stats.record_overrun();
        }

        let mut header =
            RtpHeader::new(self.payload_type, self.sequence, self.timestamp, self.ssrc);
        header.marker = self.marker_pending;
        let header_len = header
            .write_to(&mut self.packet)
            .ok_or(CodecError::BufferTooSmall {
                needed: RTP_HEADER_SIZE,
                available: self.packet.len(),
            })?;
        let payload_len = self
            .encoding
            .encode(&self.interleaved, &mut self.packet[header_len..])?;

        self.marker_pending = false;
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frames as u32);

        Ok(&self.packet[..header_len + payload_len])
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn frames_per_packet(&self) -> usize {
        self.frames
    }
}

/// Transmits one RTP stream from the device's transmit queues
pub struct StreamTransmitter {
    stream_id: StreamId,
    config: StreamConfig,
    mapping: ChannelMapping,
    device: Arc<VirtualDevice>,
    clock: Arc<dyn MediaClock>,
    network: NetworkConfig,
    stats: Arc<StreamStats>,
    ssrc: u32,
    /// Sequence number of the next packet, carried across restarts
    next_sequence: u16,
    stop: StopToken,
    thread_handle: Option<JoinHandle<u16>>,
}

impl StreamTransmitter {
    pub fn new(context: &EngineContext, config: StreamConfig, mapping: ChannelMapping) -> Self {
        Self {
            stream_id: mapping.stream_id,
            config,
            mapping,
            device: Arc::clone(&context.device),
            clock: Arc::clone(&context.clock),
            network: context.network.clone(),
            stats: Arc::new(StreamStats::new()),
            ssrc: rand::random(),
            next_sequence: rand::random(),
            stop: StopToken::new(),
            thread_handle: None,
        }
    }

    /// Open the socket and spawn the paced send thread
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(NetworkError::AlreadyRunning.into());
        }

        let mut builder = PacketBuilder::new(
            &self.config,
            &self.mapping,
            &self.device,
            &self.network,
            self.ssrc,
            Arc::clone(&self.stats),
        )?;
        let destination = self.config.socket_addr()?;
        let transport = PacketTransport::sender(&self.network)?;

        let timestamp = self.clock.rtp_timestamp(self.config.sample_rate);
        builder.start_at(self.next_sequence, timestamp);

        let stop = StopToken::new();
        self.stop = stop.clone();
        let interval = self.config.packet_interval();
        let schedule = PacketSchedule::new(
            Instant::now(),
            builder.frames_per_packet(),
            self.config.sample_rate,
        );
        let stats = Arc::clone(&self.stats);

        let handle = thread::Builder::new()
            .name(format!("rtp-tx-{}", self.config.name))
            .spawn(move || {
                transmit_loop(builder, transport, destination, stop, schedule, interval, stats)
            })
            .map_err(|e| NetworkError::Thread(e.to_string()))?;
        self.thread_handle = Some(handle);

        tracing::info!(
            "Transmitting '{}' to {} ({} ch {}, {} us packets, SSRC {:08x}, {})",
            self.config.name,
            destination,
            self.config.channel_count,
            self.config.encoding,
            self.config.packet_time_us,
            self.ssrc,
            self.mapping
        );
        Ok(())
    }

    /// Signal the thread and wait for it; safe to call repeatedly
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.thread_handle.take() {
            match handle.join() {
                Ok(next) => self.next_sequence = next,
                Err(_) => tracing::error!("Transmit thread for '{}' panicked", self.config.name),
            }
            tracing::info!("Stopped transmitting '{}'", self.config.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
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

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn mapping(&self) -> &ChannelMapping {
        &self.mapping
    }
}

impl Drop for StreamTransmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs until stopped, returning the next sequence number
fn transmit_loop(
    mut builder: PacketBuilder,
    transport: PacketTransport,
    destination: SocketAddrV4,
    stop: StopToken,
    mut schedule: PacketSchedule,
    interval: Duration,
    stats: Arc<StreamStats>,
) -> u16 {
    loop {
        let now = Instant::now();
        let deadline = schedule.deadline();
        if deadline > now {
            thread::sleep(deadline - now);
        } else if now - deadline > interval * MAX_LAG_INTERVALS {
            tracing::warn!(
                "Transmit to {} fell {:?} behind, re-anchoring schedule",
                destination,
                now - deadline
            );
            schedule.reanchor(now);
        }

        if stop.is_stopped() {
            break;
        }

        match builder.next_packet() {
            Ok(packet) => match transport.send_to(packet, destination) {
                Ok(sent) => stats.record_sent(sent),
                Err(e) => {
                    stats.record_send_error();
                    tracing::trace!("Send to {} failed: {}", destination, e);
                }
            },
            Err(e) => {
                stats.record_send_error();
                tracing::debug!("Packet build failed: {}", e);
            }
        }

        schedule.advance();
    }

    builder.sequence()
}
