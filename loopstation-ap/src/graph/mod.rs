//! Software playback graph
//!
//! A pull-model audio context with a sample-accurate tick clock. Each track
//! owns a persistent level bus; each repetition of a loop is a transient
//! voice with its own crossfade envelope, mixed through its track's bus.

pub mod context;
pub mod envelope;
pub mod param;
pub mod voice;

pub use context::{AudioContext, BusId, VoiceEnded};
pub use envelope::CrossfadeEnvelope;
pub use param::LevelParam;
pub use voice::VoiceId;
