//! Shared observer state
//!
//! Holds the two signals the UI collaborators consume (per-track audibility
//! and whether the master clock runs) and the event broadcaster that
//! publishes their changes.

use loopstation_common::events::{ClockState, LoopEvent};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Shared state accessible by all components
///
/// Uses RwLock for concurrent read access with rare writes
pub struct SharedState {
    /// Per-track "is audible" signal keyed by track id
    pub audible: RwLock<HashMap<String, bool>>,

    /// Clock state; `None` until the audio context exists
    pub clock_state: RwLock<Option<ClockState>>,

    /// Event broadcaster for SSE events
    pub event_tx: broadcast::Sender<LoopEvent>,
}

impl SharedState {
    /// Create new shared state with the given event buffer size
    pub fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            audible: RwLock::new(HashMap::new()),
            clock_state: RwLock::new(None),
            event_tx,
        }
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: LoopEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<LoopEvent> {
        self.event_tx.subscribe()
    }

    /// Record a track's audibility, publishing an event when it flips
    pub async fn set_track_audible(&self, track_id: &str, audible: bool, level: f32) {
        let previous = self
            .audible
            .write()
            .await
            .insert(track_id.to_string(), audible);

        if previous != Some(audible) {
            self.broadcast_event(LoopEvent::TrackAudibilityChanged {
                track_id: track_id.to_string(),
                audible,
                level,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Whether a track is currently audible (false if never set)
    pub async fn is_track_audible(&self, track_id: &str) -> bool {
        self.audible
            .read()
            .await
            .get(track_id)
            .copied()
            .unwrap_or(false)
    }

    /// Record the clock state, publishing an event when it changes
    pub async fn set_clock_state(&self, new_state: ClockState) {
        let old = self.clock_state.write().await.replace(new_state);

        match old {
            Some(old_state) if old_state == new_state => {}
            // First observation of a context that starts suspended is reported
            // as a transition from itself so the UI still learns the state.
            _ => self.broadcast_event(LoopEvent::ClockStateChanged {
                old_state: old.unwrap_or(new_state),
                new_state,
                timestamp: chrono::Utc::now(),
            }),
        }
    }

    /// Current clock state, if a context exists
    pub async fn get_clock_state(&self) -> Option<ClockState> {
        *self.clock_state.read().await
    }

    /// Whether the master clock is running
    pub async fn is_clock_running(&self) -> bool {
        matches!(self.get_clock_state().await, Some(ClockState::Running))
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(256)
    }
}
