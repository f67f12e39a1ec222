//! Tick-based timing for sample-accurate loop scheduling
//!
//! All scheduling instants are expressed as integer ticks at 28,224,000 Hz.
//! The rate divides evenly into every common audio sample rate, so a loop of
//! `n` frames is exactly `n × ticks_per_sample` ticks long and repeated
//! additions of a loop length never accumulate rounding error:
//!
//! - 44,100 Hz: 640 ticks/sample
//! - 48,000 Hz: 588 ticks/sample
//! - 88,200 Hz: 320 ticks/sample
//! - 96,000 Hz: 294 ticks/sample
//!
//! Seconds (`f64`) are used only at the edges: log output, events, and the
//! millisecond-based configuration values.
//!
//! ```rust
//! use loopstation_common::timing::*;
//!
//! let ticks = ms_to_ticks(5000);
//! assert_eq!(ticks, 141_120_000);
//! assert_eq!(ticks_to_samples(ticks, 48000), 240_000);
//! ```

use std::time::Duration;

/// Tick rate: 28,224,000 Hz
pub const TICK_RATE: i64 = 28_224_000;

/// Ticks per millisecond: 28,224
pub const TICKS_PER_MS: i64 = 28_224;

/// Sample rates with a precomputed tick count
const TICKS_PER_SAMPLE_TABLE: [(u32, i64); 11] = [
    (8000, 3_528),
    (11025, 2_560),
    (16000, 1_764),
    (22050, 1_280),
    (32000, 882),
    (44100, 640),
    (48000, 588),
    (88200, 320),
    (96000, 294),
    (176400, 160),
    (192000, 147),
];

/// Convert milliseconds to ticks (exact)
pub fn ms_to_ticks(ms: i64) -> i64 {
    ms * TICKS_PER_MS
}

/// Convert ticks to milliseconds (truncating)
pub fn ticks_to_ms(ticks: i64) -> i64 {
    ticks / TICKS_PER_MS
}

/// Ticks per sample frame, or `None` when the rate does not divide `TICK_RATE`
///
/// ```rust
/// use loopstation_common::timing::ticks_per_sample;
///
/// assert_eq!(ticks_per_sample(44100), Some(640));
/// assert_eq!(ticks_per_sample(44101), None);
/// ```
pub fn ticks_per_sample(sample_rate: u32) -> Option<i64> {
    if sample_rate == 0 {
        return None;
    }

    if let Some(&(_, ticks)) = TICKS_PER_SAMPLE_TABLE
        .iter()
        .find(|(rate, _)| *rate == sample_rate)
    {
        return Some(ticks);
    }

    let rate = sample_rate as i64;
    (TICK_RATE % rate == 0).then(|| TICK_RATE / rate)
}

/// Whether a sample rate can be represented exactly on the tick grid
pub fn is_supported_rate(sample_rate: u32) -> bool {
    ticks_per_sample(sample_rate).is_some()
}

/// Convert ticks to a sample frame index (truncating toward the earlier frame)
///
/// Unsupported rates fall back to a rounded floating point conversion.
pub fn ticks_to_samples(ticks: i64, sample_rate: u32) -> i64 {
    match ticks_per_sample(sample_rate) {
        Some(tps) => ticks.div_euclid(tps),
        None => (ticks as f64 * sample_rate as f64 / TICK_RATE as f64).floor() as i64,
    }
}

/// Convert a frame count to ticks
pub fn samples_to_ticks(samples: i64, sample_rate: u32) -> i64 {
    match ticks_per_sample(sample_rate) {
        Some(tps) => samples * tps,
        None => (samples as f64 * TICK_RATE as f64 / sample_rate.max(1) as f64).round() as i64,
    }
}

/// Convert ticks to seconds for display and events
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TICK_RATE as f64
}

/// Convert seconds to ticks (rounded to the nearest tick)
pub fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * TICK_RATE as f64).round() as i64
}

/// Convert a tick span to a wall-clock duration; negative spans become zero
pub fn ticks_to_duration(ticks: i64) -> Duration {
    if ticks <= 0 {
        return Duration::ZERO;
    }
    let secs = ticks / TICK_RATE;
    let rem = ticks % TICK_RATE;
    // rem < TICK_RATE, so rem × 1e9 fits in i64
    let nanos = rem * 1_000_000_000 / TICK_RATE;
    Duration::new(secs as u64, nanos as u32)
}

/// Convert a wall-clock duration to ticks (truncating)
pub fn duration_to_ticks(duration: Duration) -> i64 {
    let secs = duration.as_secs() as i64;
    let nanos = duration.subsec_nanos() as i64;
    secs * TICK_RATE + nanos * TICK_RATE / 1_000_000_000
}

#[cfg(test)]
#[path = "timing_tests.rs"]
mod tests;
