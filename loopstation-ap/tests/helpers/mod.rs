//! Shared fixtures for loop station integration tests
//!
//! - WAV generation with hound into temporary directories
//! - Transports over a manually rendered null context
//! - `advance`: render the audio clock forward while letting chains run

#![allow(dead_code)]

use hound::{SampleFormat, WavSpec, WavWriter};
use loopstation_ap::audio::NullContextFactory;
use loopstation_ap::config::EngineSettings;
use loopstation_ap::graph::AudioContext;
use loopstation_ap::playback::{AssetLoader, AssetStore, TrackDescriptor};
use loopstation_ap::Transport;
use loopstation_common::timing::ms_to_ticks;
use loopstation_common::LoopEvent;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Sample rate of generated fixtures and of the offline context
pub const RATE: u32 = 48_000;

/// Frames rendered per `advance` step (10 ms)
pub const BLOCK_FRAMES: usize = RATE as usize / 100;

/// Write a stereo 16-bit WAV holding a constant value
pub fn write_constant_wav(dir: &Path, name: &str, seconds: f64, value: f32) {
    let spec = WavSpec {
        channels: 2,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(dir.join(name), spec).unwrap();
    let sample = (value * i16::MAX as f32 + 0.5 * value.signum()) as i16;
    let frames = (seconds * RATE as f64).round() as usize;
    for _ in 0..frames {
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// One configured track: (id, file name, initial level)
pub type TrackSpec<'a> = (&'a str, &'a str, f32);

pub struct Fixture {
    pub dir: TempDir,
    pub transport: Arc<Transport>,
}

impl Fixture {
    /// Audio context, available after the first gesture
    pub fn context(&self) -> Arc<AudioContext> {
        self.transport.context().expect("no context created yet")
    }
}

/// Transport over WAV files already written into `dir`
pub fn transport_in(
    dir: &Path,
    tracks: &[TrackSpec<'_>],
    settings: EngineSettings,
    factory: NullContextFactory,
) -> Arc<Transport> {
    let descriptors = tracks
        .iter()
        .map(|(id, file, level)| TrackDescriptor {
            id: id.to_string(),
            url: file.to_string(),
            initial_level: *level,
        })
        .collect();
    let assets = AssetStore::new(AssetLoader::new(dir.to_path_buf()));
    Arc::new(Transport::new(descriptors, settings, assets, Arc::new(factory)))
}

/// Constant-valued loops of the given lengths, ids "a", "b", ...
pub fn fixture(lengths: &[f64]) -> Fixture {
    fixture_with(lengths, EngineSettings::default())
}

pub fn fixture_with(lengths: &[f64], settings: EngineSettings) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let ids: Vec<String> = (0..lengths.len())
        .map(|i| ((b'a' + i as u8) as char).to_string())
        .collect();
    let files: Vec<String> = ids.iter().map(|id| format!("{}.wav", id)).collect();

    for (file, seconds) in files.iter().zip(lengths) {
        write_constant_wav(dir.path(), file, *seconds, 0.25);
    }

    let specs: Vec<TrackSpec<'_>> = ids
        .iter()
        .zip(&files)
        .map(|(id, file)| (id.as_str(), file.as_str(), 1.0))
        .collect();
    let transport = transport_in(dir.path(), &specs, settings, NullContextFactory::manual(RATE));
    Fixture { dir, transport }
}

/// Render `ms` milliseconds in 10 ms blocks, yielding so chains can wake
pub async fn advance(context: &AudioContext, ms: u64) -> Vec<f32> {
    let mut rendered = Vec::new();
    for _ in 0..ms / 10 {
        rendered.extend(context.render_frames(BLOCK_FRAMES));
        settle().await;
    }
    rendered
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

pub fn drain(rx: &mut broadcast::Receiver<LoopEvent>) -> Vec<LoopEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Repetition start instants published for one track
pub fn starts_for(events: &[LoopEvent], track: &str) -> Vec<i64> {
    events
        .iter()
        .filter_map(|event| match event {
            LoopEvent::RepetitionScheduled {
                track_id,
                start_ticks,
                ..
            } if track_id == track => Some(*start_ticks),
            _ => None,
        })
        .collect()
}

pub fn seconds(s: f64) -> i64 {
    ms_to_ticks((s * 1000.0).round() as i64)
}
