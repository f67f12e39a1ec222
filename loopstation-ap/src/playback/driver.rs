//! Lookahead clock driver
//!
//! Each scheduling track owns one chain: a spawned task that sleeps on the
//! audio clock until shortly before the current repetition's fade, then
//! commits the next repetition at the instant stored when the current one
//! was scheduled. Cancelling the chain's token (or dropping its handle)
//! ends it at its next wake-up.
//!
//! ```text
//! Idle --start_scheduling--> Scheduling --stop_scheduling--> Idle
//!                               |   ^
//!                 clock paused  v   |  clock running again
//!                            Suspended-wait
//! ```

use crate::error::Result;
use crate::graph::AudioContext;
use crate::playback::scheduler::{CrossfadeScheduler, Repetition};
use crate::playback::track::{TrackRegistry, TrackRuntime};
use crate::state::SharedState;
use loopstation_common::timing::ticks_to_seconds;
use loopstation_common::LoopEvent;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Registry shared between the transport and the chains
pub type SharedRegistry = Arc<RwLock<TrackRegistry>>;

/// Handle on a running lookahead chain; dropping it cancels the chain
#[derive(Debug)]
pub struct SchedulerChain {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SchedulerChain {
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for SchedulerChain {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Clone)]
pub struct LookaheadDriver {
    scheduler: CrossfadeScheduler,
    safety_margin_ticks: i64,
    state: Arc<SharedState>,
}

impl LookaheadDriver {
    pub fn new(scheduler: CrossfadeScheduler, safety_margin_ticks: i64, state: Arc<SharedState>) -> Self {
        Self {
            scheduler,
            safety_margin_ticks,
            state,
        }
    }

    pub fn scheduler(&self) -> &CrossfadeScheduler {
        &self.scheduler
    }

    /// Offset from a repetition's start to the wake-up that commits the next one
    pub fn lookahead_offset(&self, track: &TrackRuntime) -> i64 {
        (self.scheduler.period(track) - track.fade_ticks - self.safety_margin_ticks).max(0)
    }

    /// Begin scheduling `track_id` with its first repetition at `t0`.
    ///
    /// The first repetition is scheduled before returning, so its errors reach
    /// the caller. Returns `false` (and does nothing) if the track is already
    /// scheduling.
    pub fn start_scheduling(
        &self,
        registry: &SharedRegistry,
        tracks: &mut TrackRegistry,
        context: &Arc<AudioContext>,
        track_id: &str,
        t0: i64,
    ) -> Result<bool> {
        let track = tracks.get_mut_or_err(track_id)?;
        if track.is_scheduling() {
            return Ok(false);
        }

        let first = self.schedule_next(context, track, t0)?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_chain(
            self.clone(),
            Arc::clone(registry),
            Arc::clone(context),
            track_id.to_string(),
            first.start,
            token.clone(),
        ));
        track.chain = Some(SchedulerChain { token, handle });

        debug!(
            "Track '{}': scheduling from {:.3}s",
            track_id,
            ticks_to_seconds(t0)
        );
        Ok(true)
    }

    /// Cancel the track's chain and hard-stop its voices
    pub fn stop_scheduling(&self, context: &AudioContext, track: &mut TrackRuntime) {
        if let Some(chain) = track.chain.take() {
            chain.cancel();
            debug!("Track '{}': scheduling stopped", track.id);
        }
        self.scheduler.hard_stop(context, track);
    }

    /// Schedule the repetition at `start` and remember where the next one goes
    fn schedule_next(&self, context: &AudioContext, track: &mut TrackRuntime, start: i64) -> Result<Repetition> {
        let repetition = self.scheduler.schedule_repetition(context, track, start)?;
        track.next_start_ticks = repetition.next_start;

        self.state.broadcast_event(LoopEvent::RepetitionScheduled {
            track_id: track.id.clone(),
            start_ticks: repetition.start,
            end_ticks: repetition.end,
            start_seconds: ticks_to_seconds(repetition.start),
            timestamp: chrono::Utc::now(),
        });

        Ok(repetition)
    }
}

async fn run_chain(
    driver: LookaheadDriver,
    registry: SharedRegistry,
    context: Arc<AudioContext>,
    track_id: String,
    first_start: i64,
    token: CancellationToken,
) {
    let mut current = first_start;

    loop {
        let wake_at = {
            let tracks = registry.read().await;
            let Some(track) = tracks.get(&track_id) else {
                return;
            };
            current + driver.lookahead_offset(track)
        };

        tokio::select! {
            _ = token.cancelled() => return,
            reached = context.wait_until_ticks(wake_at) => {
                if let Err(e) = reached {
                    debug!("Track '{}': chain ends: {}", track_id, e);
                    return;
                }
            }
        }

        if !context.state().is_running() {
            debug!("Track '{}': clock not running, holding next repetition", track_id);
            tokio::select! {
                _ = token.cancelled() => return,
                resumed = context.wait_until_running() => {
                    if let Err(e) = resumed {
                        debug!("Track '{}': chain ends: {}", track_id, e);
                        return;
                    }
                }
            }
        }

        let mut tracks = registry.write().await;
        // stop_scheduling cancels under this same lock
        if token.is_cancelled() {
            return;
        }
        let Some(track) = tracks.get_mut(&track_id) else {
            return;
        };

        let next = track.next_start_ticks;
        match driver.schedule_next(&context, track, next) {
            Ok(repetition) => {
                trace!(
                    "Track '{}': next repetition at {:.3}s (clock {:.3}s)",
                    track_id,
                    ticks_to_seconds(repetition.start),
                    context.current_time()
                );
                current = repetition.start;
            }
            Err(e) => {
                warn!("Track '{}': scheduling failed, chain stopped: {}", track_id, e);
                token.cancel();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use loopstation_common::timing::{ms_to_ticks, TICK_RATE};
    use loopstation_common::{ClockState, CrossfadeMode, FadeCurve};

    const RATE: u32 = 48000;

    struct Fixture {
        context: Arc<AudioContext>,
        registry: SharedRegistry,
        driver: LookaheadDriver,
        state: Arc<SharedState>,
    }

    fn fixture(loop_seconds: usize) -> Fixture {
        let context = Arc::new(AudioContext::new(RATE, ClockState::Running).unwrap());
        let bus = context.create_level_bus(1.0);
        let buffer = Arc::new(AudioBuffer::from_interleaved_stereo(
            vec![0.1; loop_seconds * RATE as usize * 2],
            RATE,
        ));
        let track = TrackRuntime::new("a".into(), buffer, bus, ms_to_ticks(30)).unwrap();

        let mut tracks = TrackRegistry::new();
        tracks.install(vec![track]);

        let state = Arc::new(SharedState::default());
        let scheduler = CrossfadeScheduler::new(FadeCurve::Linear, CrossfadeMode::Segue, ms_to_ticks(2));
        Fixture {
            context,
            registry: Arc::new(RwLock::new(tracks)),
            driver: LookaheadDriver::new(scheduler, ms_to_ticks(50), Arc::clone(&state)),
            state,
        }
    }

    async fn advance(context: &AudioContext, ms: usize) {
        for _ in 0..ms / 10 {
            context.render_frames(RATE as usize / 100);
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
        }
    }

    fn starts(rx: &mut tokio::sync::broadcast::Receiver<LoopEvent>) -> Vec<i64> {
        let mut starts = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LoopEvent::RepetitionScheduled { start_ticks, .. } = event {
                starts.push(start_ticks);
            }
        }
        starts
    }

    #[tokio::test]
    async fn test_chain_commits_ahead_of_boundary() {
        let f = fixture(2);
        let mut rx = f.state.subscribe_events();
        let t0 = ms_to_ticks(100);

        {
            let mut tracks = f.registry.write().await;
            assert!(f.driver.start_scheduling(&f.registry, &mut tracks, &f.context, "a", t0).unwrap());
            // Second start is a no-op
            assert!(!f.driver.start_scheduling(&f.registry, &mut tracks, &f.context, "a", 0).unwrap());
        }
        assert_eq!(starts(&mut rx), vec![t0]);

        // Wake-up is at t0 + 2s - 30ms - 50ms = 2.02s
        advance(&f.context, 2000).await;
        assert!(starts(&mut rx).is_empty());

        advance(&f.context, 40).await;
        assert_eq!(starts(&mut rx), vec![t0 + 2 * TICK_RATE]);
        assert!(f.context.current_ticks() < t0 + 2 * TICK_RATE);

        let tracks = f.registry.read().await;
        assert_eq!(tracks.get("a").unwrap().next_start_ticks, t0 + 4 * TICK_RATE);
    }

    #[tokio::test]
    async fn test_stop_scheduling_cancels_chain() {
        let f = fixture(2);
        let mut rx = f.state.subscribe_events();

        {
            let mut tracks = f.registry.write().await;
            f.driver.start_scheduling(&f.registry, &mut tracks, &f.context, "a", 0).unwrap();
        }
        advance(&f.context, 500).await;

        {
            let mut tracks = f.registry.write().await;
            let track = tracks.get_mut("a").unwrap();
            f.driver.stop_scheduling(&f.context, track);
            assert!(!track.is_scheduling());
            assert!(track.active_voices.is_empty());
        }
        assert_eq!(f.context.active_voice_count(), 0);

        starts(&mut rx);
        advance(&f.context, 3000).await;
        assert!(starts(&mut rx).is_empty());
    }

    #[test]
    fn test_lookahead_offset_never_negative() {
        let f = fixture(2);
        let tracks = f.registry.try_read().unwrap();
        let track = tracks.get("a").unwrap();
        assert_eq!(
            f.driver.lookahead_offset(track),
            2 * TICK_RATE - ms_to_ticks(80)
        );

        let greedy = LookaheadDriver::new(*f.driver.scheduler(), 10 * TICK_RATE, Arc::clone(&f.state));
        assert_eq!(greedy.lookahead_offset(track), 0);
    }
}
