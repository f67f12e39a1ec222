//! # Loop Station Common Library
//!
//! Shared code for the loop station crates including:
//! - Error types
//! - Configuration file resolution
//! - Event types published to UI collaborators
//! - Fade curve definitions and crossfade modes
//! - Tick-based timing conversions

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod timing;

pub use error::{Error, Result};
pub use events::{ClockState, LoopEvent};
pub use fade_curves::{CrossfadeMode, FadeCurve};
