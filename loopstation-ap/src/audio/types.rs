//! Core audio data types
//!
//! A decoded loop lives entirely in RAM as interleaved stereo f32 at the
//! audio context's sample rate. Buffers are immutable once built and are
//! shared by every repetition through `Arc`.

use loopstation_common::timing::samples_to_ticks;

/// One stereo sample frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFrame {
    pub left: f32,
    pub right: f32,
}

impl AudioFrame {
    pub const SILENT: AudioFrame = AudioFrame { left: 0.0, right: 0.0 };

    pub fn scaled(self, gain: f32) -> AudioFrame {
        AudioFrame {
            left: self.left * gain,
            right: self.right * gain,
        }
    }
}

/// Decoded, fixed-length loop audio
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Stereo interleaved: [L, R, L, R, ...]
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// PCM audio samples (interleaved stereo)
    samples: Vec<f32>,

    sample_rate: u32,

    /// Number of stereo frames (samples.len() / 2)
    frame_count: usize,
}

impl AudioBuffer {
    /// Build a buffer from interleaved stereo samples; a trailing odd sample is dropped
    pub fn from_interleaved_stereo(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        if samples.len() % 2 != 0 {
            samples.pop();
        }
        let frame_count = samples.len() / 2;
        Self {
            samples,
            sample_rate,
            frame_count,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Loop duration in ticks (exact for tick-compatible rates)
    pub fn duration_ticks(&self) -> i64 {
        samples_to_ticks(self.frame_count as i64, self.sample_rate)
    }

    /// Loop duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Frame at an index, or `None` past the end
    pub fn frame(&self, index: usize) -> Option<AudioFrame> {
        let i = index.checked_mul(2)?;
        match (self.samples.get(i), self.samples.get(i + 1)) {
            (Some(&left), Some(&right)) => Some(AudioFrame { left, right }),
            _ => None,
        }
    }
}
