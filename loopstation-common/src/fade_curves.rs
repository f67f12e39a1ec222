//! Fade curve implementations for loop crossfades
//!
//! Provides five fade curve types and the two crossfade modes that decide
//! where the next repetition of a loop begins relative to the current one.
//!
//! Curves are evaluated over a normalized position `0.0..=1.0` through the
//! fade. Linear and S-Curve pairs are constant-sum (fade-in + fade-out = 1.0);
//! Equal-Power is constant-power (fade-in² + fade-out² = 1.0).

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Fade curve types for crossfading
///
/// - Linear: Constant rate of change (the default loop envelope)
/// - Exponential: Slow start, fast finish
/// - Logarithmic: Fast start, slow finish
/// - SCurve: Smooth acceleration and deceleration
/// - EqualPower: Constant perceived loudness during crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,

    /// v(t) = t²
    Exponential,

    /// v(t) = 1 - (1-t)² for fade-in, (1-t)² for fade-out
    Logarithmic,

    /// v(t) = 0.5 × (1 - cos(π × t))
    #[serde(alias = "cosine", alias = "scurve", alias = "s-curve")]
    SCurve,

    /// v(t) = sin(t × π/2)
    #[serde(alias = "equalpower")]
    EqualPower,
}

impl FadeCurve {
    /// Fade-in multiplier at a normalized position (0.0 = silent, 1.0 = full volume)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                1.0 - inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Fade-out multiplier at a normalized position (1.0 at start, 0.0 at end)
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Whether a fade-out and a fade-in over the same span always sum to 1.0
    pub fn is_constant_sum(&self) -> bool {
        matches!(self, FadeCurve::Linear | FadeCurve::SCurve)
    }

    /// Canonical configuration string
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        }
    }

    /// All available fade curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::Logarithmic,
            FadeCurve::SCurve,
            FadeCurve::EqualPower,
        ]
    }
}

impl std::str::FromStr for FadeCurve {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Ok(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Ok(FadeCurve::EqualPower),
            other => Err(crate::Error::InvalidInput(format!("Unknown fade curve: {}", other))),
        }
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where repetition n+1 of a loop starts relative to repetition n
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossfadeMode {
    /// Next repetition starts exactly one loop length later; the fade-out
    /// of the outgoing repetition ends where the incoming fade-in begins.
    #[default]
    Segue,

    /// Next repetition starts one fade length before the outgoing one ends,
    /// so fade-out and fade-in share the same span.
    Overlap,
}

impl CrossfadeMode {
    /// Distance between consecutive repetition starts
    pub fn period(&self, loop_len: i64, fade_len: i64) -> i64 {
        match self {
            CrossfadeMode::Segue => loop_len,
            CrossfadeMode::Overlap => loop_len - fade_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn test_fade_in_bounds() {
        for curve in FadeCurve::all_variants() {
            let start_val = curve.calculate_fade_in(0.0);
            let end_val = curve.calculate_fade_in(1.0);
            assert!(start_val.abs() < 0.01, "{:?} fade-in at 0.0 should be ~0.0, got {}", curve, start_val);
            assert!((end_val - 1.0).abs() < 0.01, "{:?} fade-in at 1.0 should be ~1.0, got {}", curve, end_val);
        }
    }

    #[test]
    fn test_fade_out_bounds() {
        for curve in FadeCurve::all_variants() {
            let start_val = curve.calculate_fade_out(0.0);
            let end_val = curve.calculate_fade_out(1.0);
            assert!((start_val - 1.0).abs() < 0.01, "{:?} fade-out at 0.0 should be ~1.0, got {}", curve, start_val);
            assert!(end_val.abs() < 0.01, "{:?} fade-out at 1.0 should be ~0.0, got {}", curve, end_val);
        }
    }

    #[test]
    fn test_position_is_clamped() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.calculate_fade_in(-0.5), curve.calculate_fade_in(0.0));
            assert_eq!(curve.calculate_fade_in(1.5), curve.calculate_fade_in(1.0));
            assert_eq!(curve.calculate_fade_out(-0.5), curve.calculate_fade_out(0.0));
            assert_eq!(curve.calculate_fade_out(1.5), curve.calculate_fade_out(1.0));
        }
    }

    #[test]
    fn test_constant_sum_curves() {
        for curve in FadeCurve::all_variants().iter().filter(|c| c.is_constant_sum()) {
            for step in 0..=20 {
                let p = step as f32 / 20.0;
                let sum = curve.calculate_fade_in(p) + curve.calculate_fade_out(p);
                assert!((sum - 1.0).abs() < EPSILON, "{:?} sum at {} was {}", curve, p, sum);
            }
        }
    }

    #[test]
    fn test_equal_power_is_constant_power() {
        for step in 0..=20 {
            let p = step as f32 / 20.0;
            let fade_in = FadeCurve::EqualPower.calculate_fade_in(p);
            let fade_out = FadeCurve::EqualPower.calculate_fade_out(p);
            assert!((fade_in * fade_in + fade_out * fade_out - 1.0).abs() < 1e-5);
        }
        assert!(!FadeCurve::EqualPower.is_constant_sum());
    }

    #[test]
    fn test_linear_midpoint() {
        assert!((FadeCurve::Linear.calculate_fade_in(0.25) - 0.25).abs() < EPSILON);
        assert!((FadeCurve::Linear.calculate_fade_out(0.25) - 0.75).abs() < EPSILON);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("linear".parse::<FadeCurve>().unwrap(), FadeCurve::Linear);
        assert_eq!("Cosine".parse::<FadeCurve>().unwrap(), FadeCurve::SCurve);
        assert_eq!("equal_power".parse::<FadeCurve>().unwrap(), FadeCurve::EqualPower);
        assert!("bogus".parse::<FadeCurve>().is_err());

        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.to_string().parse::<FadeCurve>().unwrap(), *curve);
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(FadeCurve::default(), FadeCurve::Linear);
        assert_eq!(CrossfadeMode::default(), CrossfadeMode::Segue);
    }

    #[test]
    fn test_crossfade_mode_period() {
        assert_eq!(CrossfadeMode::Segue.period(1000, 30), 1000);
        assert_eq!(CrossfadeMode::Overlap.period(1000, 30), 970);
    }
}
