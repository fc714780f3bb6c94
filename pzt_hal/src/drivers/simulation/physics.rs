//! Piezo axis physics model.
//!
//! A closed-loop axis travels toward its target at constant velocity while
//! both its output stage and motion are enabled. Travel stops at the
//! mechanical limits; an axis pushing against a limit keeps reporting
//! "moving" because its target is never reached.
//!
//! A sticky axis parks half a target range short of its target and keeps
//! reporting "moving" until motion is disabled, like controllers that never
//! clear their on-target flag.

use std::time::Instant;
use tracing::trace;

/// Default travel limit magnitude in nm (±5 mm).
pub const DEFAULT_LIMIT: i64 = 5_000_000;

/// Default velocity in nm/s.
pub const DEFAULT_VELOCITY: f64 = 2_000_000.0;

/// Default settle tolerance in nm.
pub const DEFAULT_TARGET_RANGE: i64 = 100;

/// One simulated axis.
#[derive(Debug, Clone)]
pub struct AxisModel {
    /// Current position in nm
    position: f64,
    /// Commanded target in nm
    target: i64,
    /// Mechanical limits in nm (inclusive)
    limits: (i64, i64),
    /// Travel speed in nm/s
    velocity: f64,
    /// Output stage enabled
    output: bool,
    /// Closed-loop motion enabled
    motion: bool,
    /// Tolerance reported to the driver
    target_range: i64,
    /// Park short of the target and report "moving" while enabled
    sticky: bool,
    /// Time of the last `advance`
    last_update: Instant,
}

impl AxisModel {
    /// Axis at position 0 with default limits and velocity.
    pub fn new() -> Self {
        Self {
            position: 0.0,
            target: 0,
            limits: (-DEFAULT_LIMIT, DEFAULT_LIMIT),
            velocity: DEFAULT_VELOCITY,
            output: false,
            motion: false,
            target_range: DEFAULT_TARGET_RANGE,
            sticky: false,
            last_update: Instant::now(),
        }
    }

    /// Integrate motion up to `now`.
    pub fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        if !(self.output && self.motion) {
            return;
        }

        let (lo, hi) = self.limits;
        let mut goal = self.target as f64;
        if self.sticky {
            let short = (self.target_range / 2) as f64;
            goal -= short.copysign(goal - self.position);
        }
        let goal = goal.clamp(lo as f64, hi as f64);
        let delta = goal - self.position;
        let step = self.velocity * dt;
        if delta.abs() <= step {
            self.position = goal;
        } else {
            self.position += step.copysign(delta);
        }
        trace!(position = self.position, target = self.target, "axis advanced");
    }

    /// Position rounded to whole nm.
    pub fn position(&self) -> i64 {
        self.position.round() as i64
    }

    /// Place the axis at `position`, clamped to its limits.
    pub fn set_position(&mut self, position: i64) {
        let (lo, hi) = self.limits;
        self.position = position.clamp(lo, hi) as f64;
    }

    /// Commanded target.
    pub fn target(&self) -> i64 {
        self.target
    }

    /// Set the target without starting motion.
    pub fn set_target(&mut self, target: i64) {
        self.target = target;
    }

    /// Mechanical limits.
    pub fn limits(&self) -> (i64, i64) {
        self.limits
    }

    /// Change the mechanical limits and pull the axis inside them.
    pub fn set_limits(&mut self, min: i64, max: i64) {
        self.limits = (min, max);
        self.set_position(self.position());
    }

    /// Change the travel speed.
    pub fn set_velocity(&mut self, velocity: f64) {
        self.velocity = velocity;
    }

    /// Tolerance reported to drivers.
    pub fn target_range(&self) -> i64 {
        self.target_range
    }

    /// Change the reported tolerance.
    pub fn set_target_range(&mut self, range: i64) {
        self.target_range = range;
    }

    /// Park short of targets and keep reporting "moving".
    pub fn set_sticky(&mut self, sticky: bool) {
        self.sticky = sticky;
    }

    /// Output stage state.
    pub fn output(&self) -> bool {
        self.output
    }

    /// Enable or disable the output stage.
    pub fn set_output(&mut self, enabled: bool) {
        self.output = enabled;
    }

    /// Closed-loop motion state.
    pub fn motion(&self) -> bool {
        self.motion
    }

    /// Enable or disable closed-loop motion.
    pub fn set_motion(&mut self, enabled: bool) {
        self.motion = enabled;
    }

    /// Still travelling (or pushing against a limit) toward the target.
    pub fn is_moving(&self) -> bool {
        self.output && self.motion && (self.sticky || self.position() != self.target)
    }

    /// Pressed against the forward limit by a target beyond it.
    pub fn at_forward_end(&self) -> bool {
        self.position() >= self.limits.1 && self.target > self.limits.1
    }

    /// Pressed against the backward limit by a target beyond it.
    pub fn at_backward_end(&self) -> bool {
        self.position() <= self.limits.0 && self.target < self.limits.0
    }
}

impl Default for AxisModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn armed(target: i64) -> (AxisModel, Instant) {
        let mut axis = AxisModel::new();
        let t0 = axis.last_update;
        axis.set_output(true);
        axis.set_target(target);
        axis.set_motion(true);
        (axis, t0)
    }

    #[test]
    fn test_idle_axis_does_not_move() {
        let mut axis = AxisModel::new();
        let t0 = axis.last_update;
        axis.set_target(1000);
        axis.advance(t0 + Duration::from_secs(1));
        assert_eq!(axis.position(), 0);
        assert!(!axis.is_moving());
    }

    #[test]
    fn test_constant_velocity() {
        let (mut axis, t0) = armed(1_000_000);
        axis.set_velocity(1_000_000.0);
        axis.advance(t0 + Duration::from_millis(250));
        assert_eq!(axis.position(), 250_000);
        assert!(axis.is_moving());
        axis.advance(t0 + Duration::from_secs(2));
        assert_eq!(axis.position(), 1_000_000);
        assert!(!axis.is_moving());
    }

    #[test]
    fn test_stops_at_limit_and_keeps_moving_flag() {
        let (mut axis, t0) = armed(100);
        axis.set_limits(-50, 50);
        axis.advance(t0 + Duration::from_secs(1));
        assert_eq!(axis.position(), 50);
        assert!(axis.is_moving());
        assert!(axis.at_forward_end());
        assert!(!axis.at_backward_end());
    }

    #[test]
    fn test_sticky_axis_parks_short_and_reports_moving() {
        let (mut axis, t0) = armed(10_000);
        axis.set_sticky(true);
        axis.advance(t0 + Duration::from_secs(1));
        assert_eq!(axis.position(), 10_000 - DEFAULT_TARGET_RANGE / 2);
        assert!(axis.is_moving());
        axis.set_motion(false);
        assert!(!axis.is_moving());
    }

    #[test]
    fn test_backward_travel() {
        let (mut axis, t0) = armed(-300);
        axis.advance(t0 + Duration::from_secs(1));
        assert_eq!(axis.position(), -300);
    }
}
