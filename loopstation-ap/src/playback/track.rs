//! Per-track runtime state and the registry that owns it

use crate::audio::AudioBuffer;
use crate::error::{Error, Result};
use crate::graph::{BusId, VoiceId};
use crate::playback::driver::SchedulerChain;
use loopstation_common::timing::ticks_to_seconds;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Runtime state of one loop, created once its asset is decoded
#[derive(Debug)]
pub struct TrackRuntime {
    pub id: String,
    pub buffer: Arc<AudioBuffer>,
    /// Persistent level bus on the audio context
    pub bus: BusId,
    /// Loop duration D
    pub loop_ticks: i64,
    /// Crossfade duration F, `0 < F < D / 2`
    pub fade_ticks: i64,
    /// Start of the next repetition to be scheduled
    pub next_start_ticks: i64,
    /// Live lookahead chain, if scheduling
    pub chain: Option<SchedulerChain>,
    /// Repetitions currently in flight
    pub active_voices: HashSet<VoiceId>,
}

impl TrackRuntime {
    /// Build runtime state for a decoded buffer.
    ///
    /// # Errors
    /// `InvalidTiming` unless `0 < fade_ticks < loop_ticks / 2`.
    pub fn new(id: String, buffer: Arc<AudioBuffer>, bus: BusId, fade_ticks: i64) -> Result<Self> {
        let loop_ticks = buffer.duration_ticks();
        validate_timing(&id, loop_ticks, fade_ticks)?;

        Ok(Self {
            id,
            buffer,
            bus,
            loop_ticks,
            fade_ticks,
            next_start_ticks: 0,
            chain: None,
            active_voices: HashSet::new(),
        })
    }

    /// True while a lookahead chain is alive for this track
    pub fn is_scheduling(&self) -> bool {
        self.chain.as_ref().map_or(false, |chain| chain.is_active())
    }
}

/// Check `0 < fade < loop / 2`
pub fn validate_timing(track_id: &str, loop_ticks: i64, fade_ticks: i64) -> Result<()> {
    if loop_ticks <= 0 || fade_ticks <= 0 || fade_ticks * 2 >= loop_ticks {
        return Err(Error::InvalidTiming(format!(
            "track '{}': fade {:.4}s must be positive and under half the loop {:.4}s",
            track_id,
            ticks_to_seconds(fade_ticks),
            ticks_to_seconds(loop_ticks)
        )));
    }
    Ok(())
}

/// Track id → runtime, in configuration order
#[derive(Debug, Default)]
pub struct TrackRegistry {
    tracks: Vec<TrackRuntime>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Replace the contents with freshly built tracks
    pub fn install(&mut self, tracks: Vec<TrackRuntime>) {
        self.tracks = tracks;
    }

    pub fn get(&self, id: &str) -> Option<&TrackRuntime> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrackRuntime> {
        self.tracks.iter_mut().find(|track| track.id == id)
    }

    pub fn get_or_err(&self, id: &str) -> Result<&TrackRuntime> {
        self.get(id).ok_or_else(|| Error::UnknownTrack(id.to_string()))
    }

    pub fn get_mut_or_err(&mut self, id: &str) -> Result<&mut TrackRuntime> {
        self.get_mut(id).ok_or_else(|| Error::UnknownTrack(id.to_string()))
    }

    pub fn by_bus_mut(&mut self, bus: BusId) -> Option<&mut TrackRuntime> {
        self.tracks.iter_mut().find(|track| track.bus == bus)
    }

    pub fn ids(&self) -> Vec<String> {
        self.tracks.iter().map(|track| track.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackRuntime> {
        self.tracks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackRuntime> {
        self.tracks.iter_mut()
    }

    /// True if any track has a live chain
    pub fn any_scheduling(&self) -> bool {
        self.tracks.iter().any(TrackRuntime::is_scheduling)
    }
}

/// Observer view of one track
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackSnapshot {
    pub id: String,
    pub loop_seconds: f64,
    pub fade_seconds: f64,
    pub next_start_ticks: i64,
    pub scheduling: bool,
    pub active_voices: usize,
    /// Level the bus is heading to
    pub level_target: f32,
    /// Level at the current clock instant
    pub level_value: f32,
    pub audible: bool,
}

impl TrackSnapshot {
    pub fn new(track: &TrackRuntime, level_target: f32, level_value: f32, audible: bool) -> Self {
        Self {
            id: track.id.clone(),
            loop_seconds: ticks_to_seconds(track.loop_ticks),
            fade_seconds: ticks_to_seconds(track.fade_ticks),
            next_start_ticks: track.next_start_ticks,
            scheduling: track.is_scheduling(),
            active_voices: track.active_voices.len(),
            level_target,
            level_value,
            audible,
        }
    }
}
