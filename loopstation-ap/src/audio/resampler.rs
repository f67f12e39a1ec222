//! Audio resampling using rubato
//!
//! Converts decoded loops to the audio context's sample rate. The output
//! length is fixed at `round(frames × out_rate / in_rate)` and the filter
//! delay is trimmed, so a resampled loop keeps its exact duration and phase.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Audio resampler using rubato for sample rate conversion.
pub struct Resampler;

impl Resampler {
    /// Resample interleaved stereo audio.
    ///
    /// Returns a copy without resampling when the rates already match.
    pub fn resample_stereo(
        track_id: &str,
        input: &[f32],
        input_rate: u32,
        output_rate: u32,
    ) -> Result<Vec<f32>> {
        if input_rate == output_rate {
            debug!("Sample rate already at {}Hz, skipping resample", output_rate);
            return Ok(input.to_vec());
        }

        let resample_err = |reason: String| Error::Decode {
            track_id: track_id.to_string(),
            reason,
        };

        let planar_input = Self::deinterleave(input, 2);
        let input_frames = planar_input[0].len();
        if input_frames == 0 {
            return Ok(Vec::new());
        }

        let expected_frames = Self::expected_frames(input_frames, input_rate, output_rate);

        debug!(
            "Resampling '{}' from {}Hz to {}Hz ({} -> {} frames)",
            track_id, input_rate, output_rate, input_frames, expected_frames
        );

        let mut resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0, // max_relative_ratio (no runtime changes)
            PolynomialDegree::Septic,
            input_frames,
            2,
        )
        .map_err(|e| resample_err(format!("Failed to create resampler: {}", e)))?;

        let delay = resampler.output_delay();

        let mut planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| resample_err(format!("Resampling failed: {}", e)))?;

        // Flush the filter tail
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| resample_err(format!("Resampling flush failed: {}", e)))?;
        for (channel, rest) in planar_output.iter_mut().zip(tail) {
            channel.extend(rest);
        }

        for channel in planar_output.iter_mut() {
            let start = delay.min(channel.len());
            channel.drain(..start);
            channel.resize(expected_frames, 0.0);
        }

        Ok(Self::interleave(planar_output))
    }

    /// Output length for a given input length and rate pair
    pub fn expected_frames(input_frames: usize, input_rate: u32, output_rate: u32) -> usize {
        ((input_frames as u128 * output_rate as u128 + input_rate as u128 / 2) / input_rate as u128)
            as usize
    }

    /// Convert interleaved samples to planar format.
    ///
    /// Input:  [L, R, L, R, L, R, ...]
    /// Output: [[L, L, L, ...], [R, R, R, ...]]
    fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
        let num_frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(num_frames); channels];

        for frame in samples.chunks_exact(channels) {
            for (ch_idx, &sample) in frame.iter().enumerate() {
                planar[ch_idx].push(sample);
            }
        }

        planar
    }

    /// Convert planar samples to interleaved format.
    ///
    /// Input:  [[L, L, L, ...], [R, R, R, ...]]
    /// Output: [L, R, L, R, L, R, ...]
    fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
        if planar.is_empty() {
            return Vec::new();
        }

        let num_channels = planar.len();
        let num_frames = planar[0].len();
        let mut interleaved = Vec::with_capacity(num_frames * num_channels);

        for frame_idx in 0..num_frames {
            for channel in &planar {
                interleaved.push(channel[frame_idx]);
            }
        }

        interleaved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave() {
        let interleaved = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 3 stereo frames
        let planar = Resampler::deinterleave(&interleaved, 2);

        assert_eq!(planar.len(), 2);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_interleave() {
        let planar = vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]];
        assert_eq!(Resampler::interleave(planar), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let output = Resampler::resample_stereo("a", &input, 44100, 44100).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_expected_frames() {
        assert_eq!(Resampler::expected_frames(44100, 44100, 48000), 48000);
        assert_eq!(Resampler::expected_frames(1000, 48000, 44100), 919);
    }

    #[test]
    fn test_resample_has_exact_length() {
        let input_rate = 44100;
        let duration_frames = 4410;

        let mut input = Vec::with_capacity(duration_frames * 2);
        for i in 0..duration_frames {
            let t = i as f32 / input_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            input.push(sample);
            input.push(sample);
        }

        let output = Resampler::resample_stereo("sine", &input, input_rate, 48000).unwrap();
        assert_eq!(output.len() / 2, 4800);
        assert!(output.iter().all(|s| s.is_finite()));
    }
}
