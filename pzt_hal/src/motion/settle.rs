//! Settle polling for one move.
//!
//! Every axis is tracked independently until it settles:
//!
//! ```text
//!                      ┌─► OnTarget    (within tolerance, or controller idle)
//! MovingToTarget ──────┼─► EotStalled  (EOT flag toward target, or no progress
//!                      │                over one eot_timeout window)
//!                      └─► TimedOut    (move timeout, any axis unsettled)
//! ```
//!
//! Transport failures abort the whole move with the driver's error.

use pzt_common::hal::config::MoveTimeouts;
use pzt_common::hal::driver::{ActuatorDriver, HalError};
use pzt_common::hal::types::AxisState;
use std::thread;
use std::time::Instant;
use tracing::trace;

/// How one axis finished a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOutcome {
    /// Arrived within tolerance or stopped by the controller
    OnTarget {
        /// Last read position
        position: i64,
    },
    /// Stopped short of the target at an end of travel
    EotStalled {
        /// Position where the axis stalled
        position: i64,
    },
}

impl AxisOutcome {
    /// Last read position of the axis.
    pub fn position(&self) -> i64 {
        match *self {
            Self::OnTarget { position } | Self::EotStalled { position } => position,
        }
    }
}

struct Tracker {
    axis: usize,
    target: i64,
    tolerance: i64,
    /// Coarse progress sample (time, position) for stall detection
    sample: Option<(Instant, i64)>,
    outcome: Option<AxisOutcome>,
}

impl Tracker {
    fn poll<D: ActuatorDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        now: Instant,
        timeouts: &MoveTimeouts,
    ) -> Result<Option<AxisOutcome>, HalError> {
        let axis = self.axis;
        let position = driver.position(axis)?;
        trace!(axis, position, target = self.target, "settle poll");

        if position.abs_diff(self.target) <= self.tolerance.unsigned_abs() {
            driver.set_motion(axis, false)?;
            return Ok(Some(AxisOutcome::OnTarget { position }));
        }
        if driver.eot_flags(axis)?.blocks(position, self.target) {
            driver.set_motion(axis, false)?;
            return Ok(Some(AxisOutcome::EotStalled { position }));
        }
        if !driver.is_moving(axis)? {
            return Ok(Some(AxisOutcome::OnTarget { position }));
        }

        match self.sample {
            None => self.sample = Some((now, position)),
            Some((taken, previous)) if now.duration_since(taken) >= timeouts.eot_timeout => {
                if position.abs_diff(previous) < self.tolerance.unsigned_abs().max(1) {
                    driver.set_motion(axis, false)?;
                    return Ok(Some(AxisOutcome::EotStalled { position }));
                }
                self.sample = Some((now, position));
            }
            Some(_) => {}
        }
        Ok(None)
    }
}

/// Command `targets`, then poll until every axis settles.
///
/// Outcomes are returned in axis order. The caller owns error recovery:
/// on `Err` some axes may still have motion enabled.
pub(crate) fn settle<D: ActuatorDriver + ?Sized>(
    driver: &mut D,
    axes: &[AxisState],
    targets: &[i64],
    timeouts: &MoveTimeouts,
) -> Result<Vec<AxisOutcome>, HalError> {
    for (axis, &target) in targets.iter().enumerate() {
        driver.set_target(axis, target)?;
        driver.set_motion(axis, true)?;
    }

    let mut trackers: Vec<Tracker> = axes
        .iter()
        .zip(targets)
        .enumerate()
        .map(|(axis, (state, &target))| Tracker {
            axis,
            target,
            tolerance: state.target_range,
            sample: None,
            outcome: None,
        })
        .collect();

    let started = Instant::now();
    loop {
        thread::sleep(timeouts.poll_interval);
        let now = Instant::now();
        for tracker in trackers.iter_mut().filter(|t| t.outcome.is_none()) {
            tracker.outcome = tracker.poll(driver, now, timeouts)?;
        }
        if trackers.iter().all(|t| t.outcome.is_some()) {
            break;
        }
        if started.elapsed() >= timeouts.timeout {
            return Err(HalError::TimedOut {
                timeout: timeouts.timeout,
            });
        }
    }

    Ok(trackers.into_iter().filter_map(|t| t.outcome).collect())
}
