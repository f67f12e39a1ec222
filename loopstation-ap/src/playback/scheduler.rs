//! Crossfade voice scheduler
//!
//! Turns "play repetition of track X starting at t" into one voice on the
//! audio context with a four-point envelope, and hard-stops voices when a
//! track's scheduling is torn down.

use crate::error::Result;
use crate::graph::{AudioContext, CrossfadeEnvelope, VoiceId};
use crate::playback::track::TrackRuntime;
use loopstation_common::{CrossfadeMode, FadeCurve};
use tracing::{trace, warn};

/// One scheduled repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repetition {
    pub voice: VoiceId,
    pub start: i64,
    /// `start + loop duration`
    pub end: i64,
    /// Where the following repetition starts
    pub next_start: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CrossfadeScheduler {
    pub curve: FadeCurve,
    pub mode: CrossfadeMode,
    /// Hard stop issued this long after a repetition's end
    pub stop_tail_ticks: i64,
}

impl CrossfadeScheduler {
    pub fn new(curve: FadeCurve, mode: CrossfadeMode, stop_tail_ticks: i64) -> Self {
        Self {
            curve,
            mode,
            stop_tail_ticks,
        }
    }

    /// Distance between consecutive repetition starts for a track
    pub fn period(&self, track: &TrackRuntime) -> i64 {
        self.mode.period(track.loop_ticks, track.fade_ticks)
    }

    /// Schedule one repetition of `track` starting at `start`.
    ///
    /// The voice is registered in `track.active_voices` and removed by the
    /// completion listener when it ends.
    pub fn schedule_repetition(
        &self,
        context: &AudioContext,
        track: &mut TrackRuntime,
        start: i64,
    ) -> Result<Repetition> {
        let end = start + track.loop_ticks;
        let envelope = CrossfadeEnvelope::new(start, end, track.fade_ticks, self.curve);

        let voice = context.start_voice(
            track.bus,
            track.buffer.clone(),
            envelope,
            end + self.stop_tail_ticks,
        )?;
        track.active_voices.insert(voice);

        trace!(
            "Track '{}': {} scheduled [{}, {})",
            track.id,
            voice,
            start,
            end
        );

        Ok(Repetition {
            voice,
            start,
            end,
            next_start: start + self.period(track),
        })
    }

    /// Stop every in-flight voice of `track` immediately and clear the set.
    ///
    /// Voices that already ended are an expected race and are ignored.
    pub fn hard_stop(&self, context: &AudioContext, track: &mut TrackRuntime) {
        for voice in track.active_voices.drain() {
            match context.stop_voice(voice) {
                Ok(()) => trace!("Track '{}': {} stopped", track.id, voice),
                Err(e) if e.is_benign_race() => trace!("Track '{}': {}", track.id, e),
                Err(e) => warn!("Track '{}': failed to stop {}: {}", track.id, voice, e),
            }
        }
    }
}
