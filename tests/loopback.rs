//! Transmitter to receiver over the loopback interface

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aes67_router::codec::AudioEncoding;
use aes67_router::config::{AppConfig, StreamConfig, StreamDirection};
use aes67_router::context::EngineContext;
use aes67_router::routing::{ChannelMapping, StreamId};
use aes67_router::streams::StreamManager;

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn audio_crosses_loopback() {
    let port = 46_500;
    let context = Arc::new(EngineContext::new(&AppConfig::default()));
    let manager = StreamManager::new(Arc::clone(&context));

    let stream = StreamConfig::new("loop", "127.0.0.1", port, 2).with_encoding(AudioEncoding::L24);

    // Receive both stream channels onto device channels 10 and 11
    let rx_id = StreamId::generate();
    manager
        .add_stream_with_mapping(
            stream.clone(),
            StreamDirection::Receive,
            ChannelMapping::sequential(rx_id, "loop", 2, 10),
        )
        .unwrap();

    // Queue the tone before the transmitter starts on device channels 0 and 1
    context.device.transmit_queue(0).unwrap().write(&[0.5; 480]);
    context.device.transmit_queue(1).unwrap().write(&[-0.25; 480]);
    let tx_id = manager.add_stream(stream, StreamDirection::Transmit).unwrap();
    assert_eq!(context.transmit_router.mapping(tx_id).unwrap().device_channel_start, 0);

    let rx_left = context.device.receive_queue(10).unwrap();
    let rx_right = context.device.receive_queue(11).unwrap();
    assert!(
        wait_for(Duration::from_secs(5), || rx_left.available() >= 480),
        "received {} samples",
        rx_left.available()
    );

    // Tone samples arrive first; anything after is silence from an empty queue
    let mut out = vec![0.0f32; 480];
    rx_left.read(&mut out);
    assert!(out.iter().filter(|s| (*s - 0.5).abs() < 1e-4).count() >= 400);
    rx_right.read(&mut out);
    assert!(out.iter().filter(|s| (*s + 0.25).abs() < 1e-4).count() >= 400);

    let status = manager.status(rx_id).unwrap();
    assert!(status.connected == Some(true));
    assert!(status.statistics.packets_received > 0);
    assert_eq!(status.statistics.packets_malformed, 0);
    assert!(manager.statistics(tx_id).unwrap().packets_sent > 0);

    manager.remove_stream(tx_id).unwrap();
    manager.remove_stream(rx_id).unwrap();
    assert_eq!(context.receive_router.mapping_count(), 0);
    assert_eq!(context.transmit_router.mapping_count(), 0);
}

#[test]
fn remapped_receiver_keeps_receiving() {
    let port = 46_510;
    let context = Arc::new(EngineContext::new(&AppConfig::default()));
    let manager = StreamManager::new(Arc::clone(&context));

    let stream = StreamConfig::new("remap", "127.0.0.1", port, 1).with_encoding(AudioEncoding::L16);
    let rx_id = manager.add_stream(stream.clone(), StreamDirection::Receive).unwrap();
    let tx_id = manager.add_stream(stream, StreamDirection::Transmit).unwrap();

    manager
        .update_mapping(ChannelMapping::sequential(rx_id, "remap", 1, 64))
        .unwrap();

    let moved = context.device.receive_queue(64).unwrap();
    assert!(wait_for(Duration::from_secs(5), || moved.available() >= 96));
    assert!(manager.status(rx_id).unwrap().running);

    manager.remove_stream(tx_id).unwrap();
    manager.remove_stream(rx_id).unwrap();
}
