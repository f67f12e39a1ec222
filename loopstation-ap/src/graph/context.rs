//! Audio context: the process-wide clock and output destination
//!
//! The clock is the number of frames rendered so far, expressed in ticks.
//! It only advances while the context is `Running`; a suspended context
//! renders silence and time stands still, so everything scheduled on the
//! clock keeps its phase across pause/resume.
//!
//! Rendering is pull-based: the output device (or a null sink, or a test)
//! calls [`AudioContext::render`] with an interleaved block to fill.

use crate::audio::{AudioBuffer, AudioFrame};
use crate::error::{Error, Result};
use crate::graph::envelope::CrossfadeEnvelope;
use crate::graph::param::LevelParam;
use crate::graph::voice::{Voice, VoiceId, VoiceOutput};
use loopstation_common::timing::{ticks_per_sample, ticks_to_seconds};
use loopstation_common::ClockState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

/// Handle of a persistent per-track level bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId(pub usize);

/// Completion notification for a voice that played out or hit its stop instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceEnded {
    pub voice: VoiceId,
    pub bus: BusId,
}

#[derive(Default)]
struct RenderGraph {
    buses: Vec<LevelParam>,
    voices: Vec<Voice>,
}

pub struct AudioContext {
    sample_rate: u32,
    ticks_per_frame: i64,
    frames_rendered: AtomicU64,
    next_voice_id: AtomicU64,
    state_tx: watch::Sender<ClockState>,
    /// Frames rendered, republished after every block
    position_tx: watch::Sender<u64>,
    graph: Mutex<RenderGraph>,
    ended_tx: mpsc::UnboundedSender<VoiceEnded>,
    ended_rx: Mutex<Option<mpsc::UnboundedReceiver<VoiceEnded>>>,
}

impl AudioContext {
    /// Create a context at `sample_rate`.
    ///
    /// # Errors
    /// `ClockUnavailable` if the rate cannot be represented on the tick grid.
    pub fn new(sample_rate: u32, initial_state: ClockState) -> Result<Self> {
        let ticks_per_frame = ticks_per_sample(sample_rate).ok_or_else(|| {
            Error::ClockUnavailable(format!("unsupported sample rate {} Hz", sample_rate))
        })?;

        let (state_tx, _) = watch::channel(initial_state);
        let (position_tx, _) = watch::channel(0u64);
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        info!(
            "Audio context created: {} Hz, {} ticks/frame, {}",
            sample_rate, ticks_per_frame, initial_state
        );

        Ok(Self {
            sample_rate,
            ticks_per_frame,
            frames_rendered: AtomicU64::new(0),
            next_voice_id: AtomicU64::new(1),
            state_tx,
            position_tx,
            graph: Mutex::new(RenderGraph::default()),
            ended_tx,
            ended_rx: Mutex::new(Some(ended_rx)),
        })
    }

    fn graph(&self) -> MutexGuard<'_, RenderGraph> {
        // A panic while mixing leaves the graph structurally intact
        self.graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ticks_per_frame(&self) -> i64 {
        self.ticks_per_frame
    }

    pub fn current_frame(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    /// Current clock instant in ticks
    pub fn current_ticks(&self) -> i64 {
        self.current_frame() as i64 * self.ticks_per_frame
    }

    /// Current clock instant in seconds
    pub fn current_time(&self) -> f64 {
        ticks_to_seconds(self.current_ticks())
    }

    // ------------------------------------------------------------------
    // Clock state
    // ------------------------------------------------------------------

    pub fn state(&self) -> ClockState {
        *self.state_tx.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ClockState> {
        self.state_tx.subscribe()
    }

    pub fn resume(&self) -> Result<()> {
        self.transition(ClockState::Running)
    }

    pub fn suspend(&self) -> Result<()> {
        self.transition(ClockState::Suspended)
    }

    fn transition(&self, new_state: ClockState) -> Result<()> {
        let old = self.state();
        if old == ClockState::Closed {
            return Err(Error::ClockUnavailable("audio context is closed".to_string()));
        }
        if old != new_state {
            self.state_tx.send_replace(new_state);
            debug!("Clock {} -> {} at {:.3}s", old, new_state, self.current_time());
        }
        Ok(())
    }

    /// Stop the clock for good and release every voice
    pub fn close(&self) {
        if self.state_tx.send_replace(ClockState::Closed) != ClockState::Closed {
            self.graph().voices.clear();
            // Wake anything waiting on the position
            self.position_tx.send_modify(|_| {});
            info!("Audio context closed at {:.3}s", self.current_time());
        }
    }

    /// Wait until the clock runs.
    ///
    /// # Errors
    /// `ClockUnavailable` if the context is closed instead.
    pub async fn wait_until_running(&self) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let state = *rx
            .wait_for(|state| *state != ClockState::Suspended)
            .await
            .map_err(|_| Error::ClockUnavailable("clock state channel closed".to_string()))?;

        match state {
            ClockState::Closed => Err(Error::ClockUnavailable("audio context is closed".to_string())),
            _ => Ok(()),
        }
    }

    /// Wait until the clock reaches tick `ticks`.
    ///
    /// # Errors
    /// `ClockUnavailable` if the context closes first.
    pub async fn wait_until_ticks(&self, ticks: i64) -> Result<()> {
        let target_frame = ticks.max(0).div_euclid(self.ticks_per_frame)
            + i64::from(ticks.max(0).rem_euclid(self.ticks_per_frame) != 0);
        let target_frame = target_frame as u64;

        let state_rx = self.state_tx.subscribe();
        let mut position_rx = self.position_tx.subscribe();
        position_rx
            .wait_for(|&frames| frames >= target_frame || *state_rx.borrow() == ClockState::Closed)
            .await
            .map_err(|_| Error::ClockUnavailable("clock position channel closed".to_string()))?;

        if self.state() == ClockState::Closed {
            return Err(Error::ClockUnavailable("audio context is closed".to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Level buses
    // ------------------------------------------------------------------

    /// Create a persistent level bus feeding the output
    pub fn create_level_bus(&self, initial: f32) -> BusId {
        let mut graph = self.graph();
        graph.buses.push(LevelParam::new(initial));
        BusId(graph.buses.len() - 1)
    }

    fn with_bus<R>(&self, bus: BusId, f: impl FnOnce(&mut LevelParam) -> R) -> Result<R> {
        let mut graph = self.graph();
        graph
            .buses
            .get_mut(bus.0)
            .map(f)
            .ok_or_else(|| Error::Internal(format!("no level bus {}", bus.0)))
    }

    /// Hard-set a bus level at tick `at`
    pub fn set_level_value(&self, bus: BusId, value: f32, at: i64) -> Result<()> {
        self.with_bus(bus, |param| param.set_value_at(value, at))
    }

    /// Smoothly approach `target` from tick `at`
    pub fn set_level_target(&self, bus: BusId, target: f32, at: i64, time_constant: i64) -> Result<()> {
        self.with_bus(bus, |param| param.set_target_at(target, at, time_constant))
    }

    /// Level the bus is heading to
    pub fn level_target(&self, bus: BusId) -> Result<f32> {
        self.with_bus(bus, |param| param.target())
    }

    /// Level at the current clock instant
    pub fn level_value(&self, bus: BusId) -> Result<f32> {
        let now = self.current_ticks();
        self.with_bus(bus, |param| param.value_at(now))
    }

    // ------------------------------------------------------------------
    // Voices
    // ------------------------------------------------------------------

    /// Schedule `buffer` to play through `bus` from `envelope.start`,
    /// hard-stopping at `stop_at`.
    pub fn start_voice(
        &self,
        bus: BusId,
        buffer: Arc<AudioBuffer>,
        envelope: CrossfadeEnvelope,
        stop_at: i64,
    ) -> Result<VoiceId> {
        if self.state() == ClockState::Closed {
            return Err(Error::ClockUnavailable("audio context is closed".to_string()));
        }
        if buffer.sample_rate() != self.sample_rate {
            return Err(Error::InvalidInput(format!(
                "buffer at {} Hz cannot play on a {} Hz context",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }

        let id = VoiceId(self.next_voice_id.fetch_add(1, Ordering::Relaxed));
        let mut graph = self.graph();
        if bus.0 >= graph.buses.len() {
            return Err(Error::Internal(format!("no level bus {}", bus.0)));
        }
        graph.voices.push(Voice {
            id,
            bus: bus.0,
            buffer,
            envelope,
            stop_at,
        });
        trace!("Started {} on bus {} at tick {}", id, bus.0, envelope.start);
        Ok(id)
    }

    /// Stop a voice immediately, without a fade.
    ///
    /// # Errors
    /// `VoiceFinished` if the voice already ended.
    pub fn stop_voice(&self, id: VoiceId) -> Result<()> {
        let mut graph = self.graph();
        let before = graph.voices.len();
        graph.voices.retain(|voice| voice.id != id);
        if graph.voices.len() == before {
            return Err(Error::VoiceFinished(id.0));
        }
        Ok(())
    }

    pub fn is_voice_active(&self, id: VoiceId) -> bool {
        self.graph().voices.iter().any(|voice| voice.id == id)
    }

    pub fn active_voice_count(&self) -> usize {
        self.graph().voices.len()
    }

    /// Take the receiver of voice completion notifications (once)
    pub fn take_voice_endings(&self) -> Option<mpsc::UnboundedReceiver<VoiceEnded>> {
        self.ended_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Mix one interleaved block into `out` and advance the clock.
    ///
    /// Channel 0 is left and channel 1 right; further channels are silent
    /// and a mono output receives `(L + R) / 2`. Returns the number of frames
    /// the clock advanced (0 while not running).
    pub fn render(&self, out: &mut [f32], channels: usize) -> usize {
        if channels == 0 || !self.state().is_running() {
            out.fill(0.0);
            return 0;
        }

        let frames = out.len() / channels;
        let first = self.current_frame();
        let tpf = self.ticks_per_frame;
        let mut ended = Vec::new();

        {
            let mut guard = self.graph();
            let RenderGraph { buses, voices } = &mut *guard;

            for (i, slot) in out.chunks_exact_mut(channels).enumerate() {
                let t = (first + i as u64) as i64 * tpf;
                let mut mix = AudioFrame::SILENT;

                voices.retain(|voice| match voice.output_at(t, tpf) {
                    VoiceOutput::Pending => true,
                    VoiceOutput::Frame(frame) => {
                        let gain = buses.get(voice.bus).map_or(0.0, |bus| bus.value_at(t));
                        mix.left += frame.left * gain;
                        mix.right += frame.right * gain;
                        true
                    }
                    VoiceOutput::Finished => {
                        ended.push(VoiceEnded {
                            voice: voice.id,
                            bus: BusId(voice.bus),
                        });
                        false
                    }
                });

                let left = mix.left.clamp(-1.0, 1.0);
                let right = mix.right.clamp(-1.0, 1.0);
                if channels == 1 {
                    slot[0] = (left + right) * 0.5;
                } else {
                    slot[0] = left;
                    slot[1] = right;
                    slot[2..].fill(0.0);
                }
            }

            let end_ticks = (first + frames as u64) as i64 * tpf;
            for bus in buses.iter_mut() {
                bus.settle(end_ticks);
            }
        }

        // Trailing partial frame, if any
        out[frames * channels..].fill(0.0);

        let total = self.frames_rendered.fetch_add(frames as u64, Ordering::AcqRel) + frames as u64;
        self.position_tx.send_replace(total);

        for notice in ended {
            trace!("{} ended", notice.voice);
            let _ = self.ended_tx.send(notice);
        }

        frames
    }

    /// Render `frames` stereo frames and return them
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let mut block = vec![0.0; frames * 2];
        self.render(&mut block, 2);
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopstation_common::timing::TICK_RATE;
    use loopstation_common::FadeCurve;

    const RATE: u32 = 48000;

    fn context() -> AudioContext {
        AudioContext::new(RATE, ClockState::Running).unwrap()
    }

    fn constant_buffer(frames: usize, value: f32) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::from_interleaved_stereo(vec![value; frames * 2], RATE))
    }

    fn full_envelope(start: i64, buffer: &AudioBuffer) -> CrossfadeEnvelope {
        CrossfadeEnvelope::new(start, start + buffer.duration_ticks(), 0, FadeCurve::Linear)
    }

    #[test]
    fn test_rejects_off_grid_rate() {
        assert!(matches!(
            AudioContext::new(44_101, ClockState::Running),
            Err(Error::ClockUnavailable(_))
        ));
    }

    #[test]
    fn test_clock_advances_only_while_running() {
        let ctx = AudioContext::new(RATE, ClockState::Suspended).unwrap();
        ctx.render_frames(480);
        assert_eq!(ctx.current_ticks(), 0);

        ctx.resume().unwrap();
        ctx.render_frames(48_000);
        assert_eq!(ctx.current_ticks(), TICK_RATE);
        assert!((ctx.current_time() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_voice_mixes_through_bus() {
        let ctx = context();
        let bus = ctx.create_level_bus(0.5);
        let buffer = constant_buffer(100, 0.8);
        let env = full_envelope(0, &buffer);
        ctx.start_voice(bus, buffer, env, i64::MAX).unwrap();

        let block = ctx.render_frames(10);
        assert!((block[0] - 0.4).abs() < 1e-6);
        assert!((block[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_voice_ends_and_notifies() {
        let ctx = context();
        let mut endings = ctx.take_voice_endings().unwrap();
        assert!(ctx.take_voice_endings().is_none());

        let bus = ctx.create_level_bus(1.0);
        let buffer = constant_buffer(10, 0.1);
        let env = full_envelope(0, &buffer);
        let id = ctx.start_voice(bus, buffer, env, i64::MAX).unwrap();

        ctx.render_frames(20);
        assert!(!ctx.is_voice_active(id));
        assert_eq!(endings.try_recv().unwrap(), VoiceEnded { voice: id, bus });
    }

    #[test]
    fn test_stop_voice_twice_reports_finished() {
        let ctx = context();
        let bus = ctx.create_level_bus(1.0);
        let buffer = constant_buffer(10, 0.1);
        let env = full_envelope(0, &buffer);
        let id = ctx.start_voice(bus, buffer, env, i64::MAX).unwrap();

        ctx.stop_voice(id).unwrap();
        assert!(matches!(ctx.stop_voice(id), Err(Error::VoiceFinished(_))));
    }

    #[test]
    fn test_mono_and_multichannel_mapping() {
        let ctx = context();
        let bus = ctx.create_level_bus(1.0);
        let buffer = Arc::new(AudioBuffer::from_interleaved_stereo(vec![0.2, 0.6, 0.2, 0.6], RATE));
        let env = full_envelope(0, &buffer);
        ctx.start_voice(bus, buffer, env, i64::MAX).unwrap();

        let mut mono = [0.0f32; 1];
        ctx.render(&mut mono, 1);
        assert!((mono[0] - 0.4).abs() < 1e-6);

        let mut quad = [1.0f32; 4];
        ctx.render(&mut quad, 4);
        assert_eq!(quad, [0.2, 0.6, 0.0, 0.0]);
    }

    #[test]
    fn test_level_automation_follows_clock() {
        let ctx = context();
        let bus = ctx.create_level_bus(0.0);
        ctx.set_level_target(bus, 1.0, 0, TICK_RATE / 100).unwrap();
        assert_eq!(ctx.level_target(bus).unwrap(), 1.0);
        assert_eq!(ctx.level_value(bus).unwrap(), 0.0);

        // Twenty time constants
        ctx.render_frames(9600);
        assert_eq!(ctx.level_value(bus).unwrap(), 1.0);
    }

    #[test]
    fn test_close_is_final() {
        let ctx = context();
        ctx.close();
        assert_eq!(ctx.state(), ClockState::Closed);
        assert!(ctx.resume().is_err());
        let bus = ctx.create_level_bus(1.0);
        let buffer = constant_buffer(10, 0.1);
        let env = full_envelope(0, &buffer);
        assert!(matches!(
            ctx.start_voice(bus, buffer, env, i64::MAX),
            Err(Error::ClockUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_until_ticks_wakes_after_render() {
        let ctx = Arc::new(context());
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.wait_until_ticks(TICK_RATE / 100).await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        ctx.render_frames(480);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_running_fails_when_closed() {
        let ctx = Arc::new(AudioContext::new(RATE, ClockState::Suspended).unwrap());
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.wait_until_running().await })
        };
        tokio::task::yield_now().await;
        ctx.close();
        assert!(waiter.await.unwrap().is_err());
    }
}
