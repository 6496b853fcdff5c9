//! AES67 Sender Application
//!
//! Transmits the configured RTP streams from the virtual device's transmit
//! channels, feeding each mapped channel with a test tone in place of the
//! OS audio callback.
//!
//! Usage: `sender [config.toml]`

use anyhow::{Context, Result};
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aes67_router::{
    codec::AudioEncoding,
    config::{AppConfig, StreamConfig, StreamDirection},
    constants::*,
    context::EngineContext,
    routing::RoutingState,
    streams::StreamManager,
};

const PERIOD: Duration = Duration::from_millis(1);
const STATS_INTERVAL: Duration = Duration::from_secs(5);
const TONE_HZ: f32 = 440.0;
const TONE_LEVEL: f32 = 0.25;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = AppConfig::load_or_default(config_path.as_deref()).context("loading config")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AES67 Sender");

    if config.transmit_streams.is_empty() {
        let stream = StreamConfig::new("AES67 Output", "239.69.0.2", DEFAULT_RTP_PORT, 8)
            .with_encoding(AudioEncoding::L24);
        tracing::info!(
            "No transmit streams configured, sending to {}:{}",
            stream.address,
            stream.port
        );
        config.transmit_streams.push(stream);
    }

    let context = Arc::new(EngineContext::new(&config));
    let manager = StreamManager::new(Arc::clone(&context));

    let state_file = config.routing.state_file_for(StreamDirection::Transmit);
    if let Some(path) = &state_file {
        if path.exists() {
            let state = RoutingState::load(path).context("loading routing state")?;
            manager.restore_routing(StreamDirection::Transmit, &state)?;
        }
    }

    let started = manager.start_streams(StreamDirection::Transmit, &config.transmit_streams);
    if started.is_empty() {
        anyhow::bail!("no transmit stream could be started");
    }

    if let Some(path) = &state_file {
        manager
            .routing_state(StreamDirection::Transmit)
            .save(path)
            .context("saving routing state")?;
    }

    // Keep each mapped transmit queue about half full of tone
    let channels: Vec<usize> = context
        .transmit_router
        .all_mappings()
        .iter()
        .flat_map(|m| m.device_channels().collect::<Vec<_>>())
        .filter(|&ch| ch < context.device.transmit_channels())
        .collect();
    let target = context.device.queue_capacity() / 2;
    let step = TAU * TONE_HZ / DEFAULT_SAMPLE_RATE as f32;
    let mut phase = vec![0.0f32; channels.len()];
    let mut block = vec![0.0f32; target];
    let mut last_stats = Instant::now();

    tracing::info!("Sending {} Hz tone on {} device channels", TONE_HZ, channels.len());

    loop {
        for (slot, &channel) in channels.iter().enumerate() {
            let Some(queue) = context.device.transmit_queue(channel) else {
                continue;
            };
            let wanted = target.saturating_sub(queue.available());
            for sample in &mut block[..wanted] {
                *sample = phase[slot].sin() * TONE_LEVEL;
                phase[slot] = (phase[slot] + step) % TAU;
            }
            queue.write(&block[..wanted]);
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();

            for status in manager.all_status() {
                let stats = &status.statistics;
                tracing::info!(
                    "'{}' SSRC {:08x}: {} sent ({} bytes), {} send errors, {} overruns",
                    status.name,
                    status.ssrc.unwrap_or_default(),
                    stats.packets_sent,
                    stats.bytes_sent,
                    stats.send_errors,
                    stats.buffer_overruns
                );
            }
        }

        std::thread::sleep(PERIOD);
    }
}
