//! Transport controller
//!
//! The single entry point for UI gestures. Owns the track registry and the
//! lazily created audio context, and coordinates the asset store, the
//! lookahead driver and the observer state. All tracks that start together
//! share one origin on the audio clock; after that, tracks of different
//! lengths drift in phase relative to each other and are never resynced
//! except by an explicit reset.
//!
//! Lock order: registry, then level memory, then the context's render graph.

use crate::audio::{ContextFactory, ContextHandle};
use crate::config::{Config, EngineSettings};
use crate::error::{Error, Result};
use crate::graph::{AudioContext, BusId};
use crate::playback::assets::{AssetLoader, AssetStore, TrackDescriptor};
use crate::playback::driver::{LookaheadDriver, SharedRegistry};
use crate::playback::scheduler::CrossfadeScheduler;
use crate::playback::track::{validate_timing, TrackRegistry, TrackRuntime, TrackSnapshot};
use crate::state::SharedState;
use loopstation_common::timing::ticks_to_seconds;
use loopstation_common::{ClockState, LoopEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a hard reset does besides resynchronizing.
///
/// Defaults to silencing every level while keeping remembered levels;
/// fields missing from a request body take their default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ResetOptions {
    /// Silence every track's level
    pub mute_all: bool,
    /// Restore last requested levels to the configured initial levels
    pub restore_initial_levels: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            mute_all: true,
            restore_initial_levels: false,
        }
    }
}

impl ResetOptions {
    pub fn mute_all() -> Self {
        Self {
            mute_all: true,
            restore_initial_levels: true,
        }
    }
}

/// Observer view of the whole transport
#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    /// `None` until the first gesture creates the context
    pub clock_state: Option<ClockState>,
    pub clock_running: bool,
    pub current_seconds: f64,
    pub sample_rate: Option<u32>,
    pub loaded: bool,
    pub tracks: Vec<TrackSnapshot>,
}

#[derive(Debug, Default)]
struct LevelMemory {
    /// Last level explicitly requested per track, silent or not
    last_requested: HashMap<String, f32>,
    /// Last audible level requested per track (restored by toggle)
    last_audible: HashMap<String, f32>,
    /// Configured slider positions
    initial: HashMap<String, f32>,
}

pub struct Transport {
    descriptors: Vec<TrackDescriptor>,
    settings: EngineSettings,
    assets: AssetStore,
    factory: Arc<dyn ContextFactory>,
    context: OnceCell<ContextHandle>,
    registry: SharedRegistry,
    levels: RwLock<LevelMemory>,
    state: Arc<SharedState>,
    driver: LookaheadDriver,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(
        descriptors: Vec<TrackDescriptor>,
        settings: EngineSettings,
        assets: AssetStore,
        factory: Arc<dyn ContextFactory>,
    ) -> Self {
        let state = Arc::new(SharedState::new(settings.event_capacity));
        let scheduler = CrossfadeScheduler::new(
            settings.fade_curve,
            settings.crossfade_mode,
            settings.stop_tail_ticks(),
        );
        let driver = LookaheadDriver::new(scheduler, settings.safety_margin_ticks(), Arc::clone(&state));

        let initial: HashMap<String, f32> = descriptors
            .iter()
            .map(|d| (d.id.clone(), d.initial_level.clamp(0.0, 1.0)))
            .collect();

        Self {
            descriptors,
            settings,
            assets,
            factory,
            context: OnceCell::new(),
            registry: Arc::new(RwLock::new(TrackRegistry::new())),
            levels: RwLock::new(LevelMemory {
                last_requested: initial.clone(),
                last_audible: initial.clone(),
                initial,
            }),
            state,
            driver,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Build a transport for a loaded configuration
    pub fn from_config(config: &Config, root_folder: PathBuf, factory: Arc<dyn ContextFactory>) -> Self {
        let descriptors = config.tracks.iter().map(TrackDescriptor::from).collect();
        let assets = AssetStore::new(AssetLoader::new(root_folder));
        Self::new(descriptors, config.engine.clone(), assets, factory)
    }

    pub fn descriptors(&self) -> &[TrackDescriptor] {
        &self.descriptors
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn shared_state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LoopEvent> {
        self.state.subscribe_events()
    }

    /// The audio context, if a gesture has created it
    pub fn context(&self) -> Option<Arc<AudioContext>> {
        self.context.get().map(|handle| Arc::clone(&handle.context))
    }

    // ------------------------------------------------------------------
    // Context and assets
    // ------------------------------------------------------------------

    /// Create the process-wide context on first use.
    ///
    /// # Errors
    /// `ClockUnavailable` if the factory fails; the transport stays without a
    /// context and a later gesture tries again.
    pub async fn ensure_context(&self) -> Result<Arc<AudioContext>> {
        let handle = self.context.get_or_try_init(|| self.create_context()).await?;
        Ok(Arc::clone(&handle.context))
    }

    async fn create_context(&self) -> Result<ContextHandle> {
        let factory = Arc::clone(&self.factory);
        info!("Creating audio context on {}", factory.describe());

        let handle = tokio::task::spawn_blocking(move || factory.create())
            .await
            .map_err(|e| Error::Internal(format!("context creation task failed: {}", e)))?
            .map_err(|e| match e {
                Error::ClockUnavailable(_) => e,
                other => Error::ClockUnavailable(other.to_string()),
            })?;

        self.spawn_listeners(&handle.context);
        self.state.set_clock_state(handle.context.state()).await;
        Ok(handle)
    }

    /// Completion hook and clock-state mirror
    fn spawn_listeners(&self, context: &Arc<AudioContext>) {
        let mut tasks = Vec::with_capacity(2);

        if let Some(mut endings) = context.take_voice_endings() {
            let registry = Arc::clone(&self.registry);
            tasks.push(tokio::spawn(async move {
                while let Some(ended) = endings.recv().await {
                    let mut tracks = registry.write().await;
                    if let Some(track) = tracks.by_bus_mut(ended.bus) {
                        track.active_voices.remove(&ended.voice);
                    }
                }
            }));
        }

        let mut clock_rx = context.subscribe_state();
        let state = Arc::clone(&self.state);
        tasks.push(tokio::spawn(async move {
            while clock_rx.changed().await.is_ok() {
                let clock_state = *clock_rx.borrow_and_update();
                state.set_clock_state(clock_state).await;
                if clock_state == ClockState::Closed {
                    break;
                }
            }
        }));

        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(tasks);
    }

    /// Decode every asset and build runtime state, once.
    ///
    /// All-or-nothing: on any failure the registry stays empty.
    async fn ensure_tracks_locked(&self, context: &AudioContext, tracks: &mut TrackRegistry) -> Result<()> {
        if !tracks.is_empty() {
            return Ok(());
        }

        let buffers = self.assets.load_all(&self.descriptors, context.sample_rate()).await?;

        let mut fades = Vec::with_capacity(buffers.len());
        for (descriptor, buffer) in self.descriptors.iter().zip(&buffers) {
            let loop_ticks = buffer.duration_ticks();
            let fade_ticks = self.settings.fade_ticks_for(loop_ticks);
            validate_timing(&descriptor.id, loop_ticks, fade_ticks)?;
            fades.push(fade_ticks);
        }

        let runtimes = self
            .descriptors
            .iter()
            .zip(buffers)
            .zip(fades)
            .map(|((descriptor, buffer), fade_ticks)| {
                let bus = context.create_level_bus(0.0);
                TrackRuntime::new(descriptor.id.clone(), buffer, bus, fade_ticks)
            })
            .collect::<Result<Vec<_>>>()?;

        for track in &runtimes {
            debug!(
                "Track '{}': loop {:.3}s, fade {:.3}s",
                track.id,
                ticks_to_seconds(track.loop_ticks),
                ticks_to_seconds(track.fade_ticks)
            );
        }

        tracks.install(runtimes);
        self.state.broadcast_event(LoopEvent::AssetsLoaded {
            track_count: tracks.len(),
            timestamp: chrono::Utc::now(),
        });
        info!("{} tracks loaded", tracks.len());
        Ok(())
    }

    fn known_track(&self, track_id: &str) -> Result<()> {
        if self.descriptors.iter().any(|d| d.id == track_id) {
            Ok(())
        } else {
            Err(Error::UnknownTrack(track_id.to_string()))
        }
    }

    /// Track gestures create the context and wake a suspended clock
    async fn gesture(&self) -> Result<Arc<AudioContext>> {
        let context = self.ensure_context().await?;
        if context.state() == ClockState::Suspended {
            context.resume()?;
            self.state.set_clock_state(context.state()).await;
        }
        Ok(context)
    }

    fn start_all_locked(&self, context: &Arc<AudioContext>, tracks: &mut TrackRegistry, origin: i64) -> Result<()> {
        for id in tracks.ids() {
            if let Err(e) = self.driver.start_scheduling(&self.registry, tracks, context, &id, origin) {
                // Leave no partially started set behind
                for track in tracks.iter_mut() {
                    self.driver.stop_scheduling(context, track);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport operations
    // ------------------------------------------------------------------

    /// Load assets and start every track at one shared origin, unless some
    /// track is already scheduling. Levels are left as they are (silent on
    /// first start). Returns whether anything was started.
    pub async fn start_all_if_needed(&self) -> Result<bool> {
        let context = self.ensure_context().await?;
        let mut tracks = self.registry.write().await;
        self.ensure_tracks_locked(&context, &mut tracks).await?;

        if tracks.any_scheduling() {
            return Ok(false);
        }

        let origin = context.current_ticks() + self.settings.start_delay_ticks();
        self.start_all_locked(&context, &mut tracks, origin)?;

        info!(
            "Started {} tracks at {:.3}s",
            tracks.len(),
            ticks_to_seconds(origin)
        );
        self.state.broadcast_event(LoopEvent::TransportStarted {
            origin_seconds: ticks_to_seconds(origin),
            track_count: tracks.len(),
            timestamp: chrono::Utc::now(),
        });
        Ok(true)
    }

    /// Smoothly move a track to `level` (clamped to 0.0-1.0) and remember it
    /// as the track's last requested level. Audible levels are also what a
    /// later toggle raises the track back to.
    pub async fn set_track_level(&self, track_id: &str, level: f32) -> Result<()> {
        self.known_track(track_id)?;
        if !level.is_finite() {
            return Err(Error::InvalidInput(format!("level must be a number, got {}", level)));
        }
        let level = level.clamp(0.0, 1.0);

        self.gesture().await?;
        self.start_all_if_needed().await?;

        {
            let mut levels = self.levels.write().await;
            levels.last_requested.insert(track_id.to_string(), level);
            if level > self.settings.audibility_threshold {
                levels.last_audible.insert(track_id.to_string(), level);
            }
        }
        self.apply_level(track_id, level).await
    }

    /// Slider form of `set_track_level` (0-100)
    pub async fn set_track_level_percent(&self, track_id: &str, percent: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(Error::InvalidInput(format!(
                "percent must be within 0-100, got {}",
                percent
            )));
        }
        self.set_track_level(track_id, (percent / 100.0) as f32).await
    }

    /// Mute an audible track, or raise a silent one to the last audible level
    /// requested for it (1.0 if none was ever recorded). Decides on the level the track is
    /// heading to, not the smoothed value. Returns whether the track is now
    /// audible.
    pub async fn toggle_track(&self, track_id: &str) -> Result<bool> {
        self.known_track(track_id)?;
        let context = self.gesture().await?;
        self.start_all_if_needed().await?;

        let bus = self.bus_of(track_id).await?;
        let threshold = self.settings.audibility_threshold;

        if context.level_target(bus)? > threshold {
            self.apply_level(track_id, 0.0).await?;
            return Ok(false);
        }

        let raise = self
            .levels
            .read()
            .await
            .last_audible
            .get(track_id)
            .copied()
            .filter(|level| *level > threshold)
            .unwrap_or(1.0);
        self.apply_level(track_id, raise).await?;
        Ok(true)
    }

    /// Hard-stop every track, optionally silence and restore levels, then
    /// restart all tracks at a fresh shared origin.
    pub async fn reset_all(&self, options: ResetOptions) -> Result<()> {
        let context = self.ensure_context().await?;
        let mut tracks = self.registry.write().await;
        self.ensure_tracks_locked(&context, &mut tracks).await?;

        for track in tracks.iter_mut() {
            self.driver.stop_scheduling(&context, track);
        }

        let now = context.current_ticks();
        if options.mute_all {
            for track in tracks.iter() {
                context.set_level_value(track.bus, 0.0, now)?;
            }
        }

        if options.restore_initial_levels {
            let mut levels = self.levels.write().await;
            levels.last_requested = levels.initial.clone();
            levels.last_audible = levels.initial.clone();
        }

        let origin = now + self.settings.reset_start_delay_ticks();
        self.start_all_locked(&context, &mut tracks, origin)?;
        let ids = tracks.ids();
        drop(tracks);

        if options.mute_all {
            for id in &ids {
                self.state.set_track_audible(id, false, 0.0).await;
            }
        }

        info!(
            "Reset {} tracks (mute_all={}) at {:.3}s",
            ids.len(),
            options.mute_all,
            ticks_to_seconds(origin)
        );
        self.state.broadcast_event(LoopEvent::TransportReset {
            origin_seconds: ticks_to_seconds(origin),
            muted: options.mute_all,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Reset with every level silenced and sliders back to their initial values
    pub async fn mute_all(&self) -> Result<()> {
        self.reset_all(ResetOptions::mute_all()).await
    }

    /// Suspend the shared clock; a no-op before any gesture
    pub async fn pause_all(&self) -> Result<()> {
        if let Some(context) = self.context() {
            context.suspend()?;
            self.state.set_clock_state(context.state()).await;
        }
        Ok(())
    }

    /// Resume the shared clock
    pub async fn resume_all(&self) -> Result<()> {
        let context = self.ensure_context().await?;
        context.resume()?;
        self.state.set_clock_state(context.state()).await;
        Ok(())
    }

    /// Master play/pause.
    ///
    /// With nothing scheduling, applies every track's last requested level,
    /// starts all tracks at a fresh origin and makes sure the clock runs.
    /// Otherwise flips between suspended and running.
    pub async fn toggle_master(&self) -> Result<ClockState> {
        let context = self.ensure_context().await?;

        let mut tracks = self.registry.write().await;
        self.ensure_tracks_locked(&context, &mut tracks).await?;

        if !tracks.any_scheduling() {
            let now = context.current_ticks();
            let applied: Vec<(String, BusId, f32)> = {
                let levels = self.levels.read().await;
                tracks
                    .iter()
                    .map(|track| {
                        let level = levels.last_requested.get(&track.id).copied().unwrap_or(1.0);
                        (track.id.clone(), track.bus, level)
                    })
                    .collect()
            };
            for (_, bus, level) in &applied {
                context.set_level_value(*bus, *level, now)?;
            }

            let origin = now + self.settings.reset_start_delay_ticks();
            self.start_all_locked(&context, &mut tracks, origin)?;
            drop(tracks);

            let threshold = self.settings.audibility_threshold;
            for (id, _, level) in &applied {
                self.state.set_track_audible(id, *level > threshold, *level).await;
            }
            self.state.broadcast_event(LoopEvent::TransportStarted {
                origin_seconds: ticks_to_seconds(origin),
                track_count: applied.len(),
                timestamp: chrono::Utc::now(),
            });

            context.resume()?;
        } else {
            drop(tracks);
            match context.state() {
                ClockState::Running => context.suspend()?,
                ClockState::Suspended => context.resume()?,
                ClockState::Closed => {
                    return Err(Error::ClockUnavailable("audio context is closed".to_string()))
                }
            }
        }

        let clock_state = context.state();
        self.state.set_clock_state(clock_state).await;
        debug!("Master toggled: clock {}", clock_state);
        Ok(clock_state)
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub async fn is_track_audible(&self, track_id: &str) -> Result<bool> {
        self.known_track(track_id)?;
        Ok(self.state.is_track_audible(track_id).await)
    }

    pub async fn is_clock_running(&self) -> bool {
        self.state.is_clock_running().await
    }

    /// Snapshot of one track; `None` before its asset is loaded
    pub async fn track_snapshot(&self, track_id: &str) -> Result<Option<TrackSnapshot>> {
        self.known_track(track_id)?;
        let Some(context) = self.context() else {
            return Ok(None);
        };
        let tracks = self.registry.read().await;
        match tracks.get(track_id) {
            Some(track) => Ok(Some(self.snapshot_of(&context, track).await?)),
            None => Ok(None),
        }
    }

    pub async fn status(&self) -> Result<TransportStatus> {
        let context = self.context();
        let tracks = self.registry.read().await;

        let mut snapshots = Vec::with_capacity(tracks.len());
        if let Some(context) = &context {
            for track in tracks.iter() {
                snapshots.push(self.snapshot_of(context, track).await?);
            }
        }

        let clock_state = context.as_ref().map(|c| c.state());
        Ok(TransportStatus {
            clock_state,
            clock_running: clock_state.map_or(false, |s| s.is_running()),
            current_seconds: context.as_ref().map_or(0.0, |c| c.current_time()),
            sample_rate: context.as_ref().map(|c| c.sample_rate()),
            loaded: !tracks.is_empty(),
            tracks: snapshots,
        })
    }

    async fn snapshot_of(&self, context: &AudioContext, track: &TrackRuntime) -> Result<TrackSnapshot> {
        let target = context.level_target(track.bus)?;
        let value = context.level_value(track.bus)?;
        let audible = self.state.is_track_audible(&track.id).await;
        Ok(TrackSnapshot::new(track, target, value, audible))
    }

    /// Stop every chain and close the clock
    pub async fn shutdown(&self) {
        if let Some(context) = self.context() {
            let mut tracks = self.registry.write().await;
            for track in tracks.iter_mut() {
                self.driver.stop_scheduling(&context, track);
            }
            drop(tracks);
            context.close();
            self.state.set_clock_state(ClockState::Closed).await;
        }

        let tasks = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in tasks {
            task.abort();
        }
        info!("Transport shut down");
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn bus_of(&self, track_id: &str) -> Result<BusId> {
        let tracks = self.registry.read().await;
        Ok(tracks.get_or_err(track_id)?.bus)
    }

    /// Ramp a track's bus toward `level` and publish its audibility
    async fn apply_level(&self, track_id: &str, level: f32) -> Result<()> {
        let context = self.ensure_context().await?;
        let bus = self.bus_of(track_id).await?;

        context.set_level_target(
            bus,
            level,
            context.current_ticks(),
            self.settings.level_time_constant_ticks(),
        )?;

        let audible = level > self.settings.audibility_threshold;
        self.state.set_track_audible(track_id, audible, level).await;
        if !audible {
            debug!("Track '{}' muted", track_id);
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let tasks = self.background.get_mut().map(std::mem::take).unwrap_or_default();
        if !tasks.is_empty() {
            warn!("Transport dropped without shutdown; aborting background tasks");
        }
        for task in tasks {
            task.abort();
        }
    }
}
