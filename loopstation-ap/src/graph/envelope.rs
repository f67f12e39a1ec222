//! Per-repetition crossfade envelope
//!
//! Four points: 0 at `start`, 1 at `start + fade`, 1 at `end - fade`,
//! 0 at `end`. Outside `[start, end)` the envelope is 0.

use loopstation_common::FadeCurve;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeEnvelope {
    pub start: i64,
    pub end: i64,
    pub fade: i64,
    pub curve: FadeCurve,
}

impl CrossfadeEnvelope {
    pub fn new(start: i64, end: i64, fade: i64, curve: FadeCurve) -> Self {
        Self {
            start,
            end,
            fade,
            curve,
        }
    }

    /// Gain at tick `t`
    pub fn value_at(&self, t: i64) -> f32 {
        if t < self.start || t >= self.end {
            return 0.0;
        }
        if self.fade <= 0 {
            return 1.0;
        }

        let fade_in_end = self.start + self.fade;
        let fade_out_start = self.end - self.fade;

        if t < fade_in_end {
            let p = (t - self.start) as f64 / self.fade as f64;
            self.curve.calculate_fade_in(p as f32)
        } else if t >= fade_out_start {
            let p = (t - fade_out_start) as f64 / self.fade as f64;
            self.curve.calculate_fade_out(p as f32)
        } else {
            1.0
        }
    }
}
