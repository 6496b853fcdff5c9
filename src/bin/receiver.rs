//! AES67 Receiver Application
//!
//! Receives the configured RTP streams onto the virtual device's receive
//! channels and plays the role of the device callback by draining them.
//!
//! Usage: `receiver [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aes67_router::{
    config::{AppConfig, StreamConfig, StreamDirection},
    constants::*,
    context::EngineContext,
    routing::RoutingState,
    streams::StreamManager,
};

/// Device callback period
const PERIOD: Duration = Duration::from_millis(1);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

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

    tracing::info!("Starting AES67 Receiver");

    if config.receive_streams.is_empty() {
        let stream = StreamConfig::new("AES67 Input", "239.69.0.1", DEFAULT_RTP_PORT, 8);
        tracing::info!(
            "No receive streams configured, listening on {}:{}",
            stream.address,
            stream.port
        );
        config.receive_streams.push(stream);
    }

    let context = Arc::new(EngineContext::new(&config));
    let manager = StreamManager::new(Arc::clone(&context));

    let state_file = config.routing.state_file_for(StreamDirection::Receive);
    if let Some(path) = &state_file {
        if path.exists() {
            let state = RoutingState::load(path).context("loading routing state")?;
            manager.restore_routing(StreamDirection::Receive, &state)?;
        }
    }

    let started = manager.start_streams(StreamDirection::Receive, &config.receive_streams);
    if started.is_empty() {
        anyhow::bail!("no receive stream could be started");
    }

    if let Some(path) = &state_file {
        manager
            .routing_state(StreamDirection::Receive)
            .save(path)
            .context("saving routing state")?;
    }

    // Stand-in for the OS audio callback: drain one period per channel
    let frames = (DEFAULT_SAMPLE_RATE as usize * PERIOD.as_micros() as usize) / 1_000_000;
    let mut period = vec![0.0f32; frames];
    let mut peaks = vec![0.0f32; context.device.receive_channels()];
    let mut last_stats = Instant::now();

    tracing::info!("Waiting for audio...");

    loop {
        for (channel, peak) in peaks.iter_mut().enumerate() {
            let Some(queue) = context.device.receive_queue(channel) else {
                continue;
            };
            let got = queue.read(&mut period);
            for sample in &period[..got] {
                *peak = peak.max(sample.abs());
            }
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();

            for status in manager.all_status() {
                let stats = &status.statistics;
                tracing::info!(
                    "'{}' {}: {} received, {} lost ({:.2}% loss), {} malformed, {} underruns",
                    status.name,
                    if status.connected == Some(true) { "connected" } else { "idle" },
                    stats.packets_received,
                    stats.packets_lost,
                    stats.loss_rate() * 100.0,
                    stats.packets_malformed,
                    stats.buffer_underruns
                );

                let levels: Vec<String> = status
                    .mapping
                    .device_channels()
                    .filter_map(|ch| peaks.get(ch).map(|p| format!("{}:{:.2}", ch, p)))
                    .collect();
                tracing::debug!("'{}' peaks {}", status.name, levels.join(" "));
            }
            peaks.fill(0.0);
        }

        std::thread::sleep(PERIOD);
    }
}
