//! Event types published to UI collaborators
//!
//! Events are broadcast by the transport and serialized for SSE transmission.
//! Every event carries a UTC timestamp.

use serde::{Deserialize, Serialize};

/// State of the shared audio clock
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockState {
    /// Clock halted; no time passes and nothing is audible
    Suspended,
    /// Clock advancing with the output device
    Running,
    /// Clock torn down; never runs again
    Closed,
}

impl ClockState {
    /// True while the clock is advancing
    pub fn is_running(&self) -> bool {
        matches!(self, ClockState::Running)
    }
}

impl std::fmt::Display for ClockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockState::Suspended => write!(f, "suspended"),
            ClockState::Running => write!(f, "running"),
            ClockState::Closed => write!(f, "closed"),
        }
    }
}

/// Loop station event types
///
/// Emitted by the transport and the lookahead driver, consumed by the SSE
/// stream and by tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoopEvent {
    /// A track crossed the audibility threshold (drives button styling)
    TrackAudibilityChanged {
        track_id: String,
        audible: bool,
        /// Requested level (0.0-1.0)
        level: f32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The shared clock changed state (drives the play/pause icon)
    ClockStateChanged {
        old_state: ClockState,
        new_state: ClockState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All tracks were started at a shared origin
    TransportStarted {
        /// Shared origin on the audio clock (seconds)
        origin_seconds: f64,
        track_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Hard reset and resynchronization
    TransportReset {
        origin_seconds: f64,
        /// Whether every level was silenced
        muted: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every track asset was fetched and decoded
    AssetsLoaded {
        track_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One repetition of a track was committed to the audio clock
    RepetitionScheduled {
        track_id: String,
        /// Start instant in ticks
        start_ticks: i64,
        /// End instant in ticks (start + loop duration)
        end_ticks: i64,
        start_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl LoopEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            LoopEvent::TrackAudibilityChanged { .. } => "TrackAudibilityChanged",
            LoopEvent::ClockStateChanged { .. } => "ClockStateChanged",
            LoopEvent::TransportStarted { .. } => "TransportStarted",
            LoopEvent::TransportReset { .. } => "TransportReset",
            LoopEvent::AssetsLoaded { .. } => "AssetsLoaded",
            LoopEvent::RepetitionScheduled { .. } => "RepetitionScheduled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_state_serialization() {
        assert_eq!(serde_json::to_string(&ClockState::Running).unwrap(), "\"running\"");
        let state: ClockState = serde_json::from_str("\"suspended\"").unwrap();
        assert_eq!(state, ClockState::Suspended);
        assert!(!state.is_running());
    }

    #[test]
    fn test_event_is_tagged_by_type() {
        let event = LoopEvent::TrackAudibilityChanged {
            track_id: "piano".to_string(),
            audible: true,
            level: 0.5,
            timestamp: chrono::Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TrackAudibilityChanged");
        assert_eq!(json["track_id"], "piano");
        assert_eq!(json["audible"], true);
        assert_eq!(event.event_type(), "TrackAudibilityChanged");
    }

    #[test]
    fn test_clock_event_roundtrip() {
        let event = LoopEvent::ClockStateChanged {
            old_state: ClockState::Running,
            new_state: ClockState::Suspended,
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        match serde_json::from_str::<LoopEvent>(&json).unwrap() {
            LoopEvent::ClockStateChanged { old_state, new_state, .. } => {
                assert_eq!(old_state, ClockState::Running);
                assert_eq!(new_state, ClockState::Suspended);
            }
            other => panic!("Expected ClockStateChanged, got {:?}", other),
        }
    }
}
