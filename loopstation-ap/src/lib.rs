//! # Loop Station Audio Engine (loopstation-ap)
//!
//! Gapless looping of several audio tracks against one shared sample clock.
//!
//! Each track is decoded once, then rescheduled a repetition at a time by a
//! lookahead chain that wakes shortly before the current repetition ends and
//! commits the next one to the audio clock with a short crossfade. The
//! transport coordinates start, reset, per-track levels and the master
//! play/pause, and publishes observer events over an HTTP/SSE surface.
//!
//! **Architecture:** symphonia + rubato decode into shared buffers, a pull
//! render graph with tick-precise voices, cpal output on a dedicated thread.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod graph;
pub mod playback;
pub mod state;

pub use error::{Error, Result};
pub use playback::{ResetOptions, Transport, TransportStatus};
pub use state::SharedState;
