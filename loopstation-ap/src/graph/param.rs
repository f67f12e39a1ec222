//! Automated gain parameter for level buses
//!
//! Supports one pending automation at a time: a hard set at an instant, or
//! an exponential approach toward a target (`setTargetAtTime` semantics).
//! Scheduling a new automation first freezes the value the previous one
//! would have produced at the new automation's start.

/// Distance from the target below which an approach snaps to it
const SNAP_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Automation {
    Hold,
    Set { value: f32, at: i64 },
    Target { target: f32, at: i64, time_constant: i64 },
}

/// Gain parameter evaluated on the tick clock
#[derive(Debug, Clone, PartialEq)]
pub struct LevelParam {
    /// Value before the pending automation takes effect
    base: f32,
    automation: Automation,
}

impl LevelParam {
    pub fn new(initial: f32) -> Self {
        Self {
            base: initial,
            automation: Automation::Hold,
        }
    }

    /// Jump to `value` at tick `at`
    pub fn set_value_at(&mut self, value: f32, at: i64) {
        self.base = self.value_at(at);
        self.automation = Automation::Set { value, at };
    }

    /// Approach `target` exponentially from tick `at`
    ///
    /// A non-positive time constant degrades to `set_value_at`.
    pub fn set_target_at(&mut self, target: f32, at: i64, time_constant: i64) {
        if time_constant <= 0 {
            self.set_value_at(target, at);
            return;
        }
        self.base = self.value_at(at);
        self.automation = Automation::Target {
            target,
            at,
            time_constant,
        };
    }

    /// The value this parameter is heading to
    pub fn target(&self) -> f32 {
        match self.automation {
            Automation::Hold => self.base,
            Automation::Set { value, .. } => value,
            Automation::Target { target, .. } => target,
        }
    }

    /// Value at tick `t`
    pub fn value_at(&self, t: i64) -> f32 {
        match self.automation {
            Automation::Hold => self.base,
            Automation::Set { at, .. } | Automation::Target { at, .. } if t < at => self.base,
            Automation::Set { value, .. } => value,
            Automation::Target {
                target,
                at,
                time_constant,
            } => {
                let elapsed = (t - at) as f64 / time_constant as f64;
                let value = target + (self.base - target) * (-elapsed).exp() as f32;
                if (value - target).abs() < SNAP_EPSILON {
                    target
                } else {
                    value
                }
            }
        }
    }

    /// Fold a finished automation into a constant so later reads are cheap
    pub fn settle(&mut self, now: i64) {
        let settled = match self.automation {
            Automation::Hold => return,
            Automation::Set { value, at } => (now >= at).then_some(value),
            Automation::Target { target, at, .. } => {
                (now >= at && self.value_at(now) == target).then_some(target)
            }
        };
        if let Some(value) = settled {
            self.base = value;
            self.automation = Automation::Hold;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold() {
        let param = LevelParam::new(0.25);
        assert_eq!(param.value_at(0), 0.25);
        assert_eq!(param.value_at(1_000_000), 0.25);
        assert_eq!(param.target(), 0.25);
    }

    #[test]
    fn test_set_value_at() {
        let mut param = LevelParam::new(1.0);
        param.set_value_at(0.0, 100);
        assert_eq!(param.value_at(99), 1.0);
        assert_eq!(param.value_at(100), 0.0);
        assert_eq!(param.target(), 0.0);
    }

    #[test]
    fn test_exponential_approach() {
        let mut param = LevelParam::new(0.0);
        param.set_target_at(1.0, 0, 1000);

        assert_eq!(param.value_at(0), 0.0);
        let one_tc = param.value_at(1000);
        assert!((one_tc - (1.0 - (-1.0f32).exp())).abs() < 1e-4);
        assert!(param.value_at(2000) > one_tc);
        // Within snap distance after ~12 time constants
        assert_eq!(param.value_at(12_000), 1.0);
        assert_eq!(param.target(), 1.0);
    }

    #[test]
    fn test_retarget_starts_from_current_value() {
        let mut param = LevelParam::new(0.0);
        param.set_target_at(1.0, 0, 1000);
        let mid = param.value_at(500);

        param.set_target_at(0.0, 500, 1000);
        assert!((param.value_at(500) - mid).abs() < 1e-6);
        assert!(param.value_at(1500) < mid);
        assert_eq!(param.target(), 0.0);
    }

    #[test]
    fn test_zero_time_constant_is_hard_set() {
        let mut param = LevelParam::new(0.3);
        param.set_target_at(0.9, 10, 0);
        assert_eq!(param.value_at(10), 0.9);
    }

    #[test]
    fn test_settle() {
        let mut param = LevelParam::new(0.0);
        param.set_value_at(0.5, 10);
        param.settle(5);
        assert_eq!(param.value_at(5), 0.0);
        param.settle(10);
        assert_eq!(param.value_at(0), 0.5);
    }
}
