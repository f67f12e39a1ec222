//! Audio decoding, resampling, and device output

pub mod decoder;
pub mod output;
pub mod resampler;
pub mod types;

pub use decoder::{DecodedAudio, SimpleDecoder};
pub use output::{AudioOutput, ContextFactory, ContextHandle, CpalContextFactory, NullContextFactory};
pub use resampler::Resampler;
pub use types::{AudioBuffer, AudioFrame};
