//! Axis and device data types.
//!
//! This module defines the data carried between drivers, the motion
//! controller and registry consumers:
//! - `AxisRange` - Closed travel interval with possibly unknown bounds
//! - `MotionFlag` / `AxisState` - Per-axis controller state
//! - `DeviceInfo` / `InitInfo` - Snapshots handed out to consumers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed travel interval of one axis.
///
/// `None` marks a bound that is not known yet. An unknown bound does not
/// constrain targets until it is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisRange {
    /// Lower bound (inclusive)
    pub min: Option<i64>,
    /// Upper bound (inclusive)
    pub max: Option<i64>,
}

impl AxisRange {
    /// Interval with both bounds known.
    pub const fn new(min: i64, max: i64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Interval with both bounds unknown.
    pub const fn unknown() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// Returns true when both bounds are known.
    pub fn is_known(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    /// Returns true when `position` does not violate any known bound.
    pub fn contains(&self, position: i64) -> bool {
        self.min.is_none_or(|min| position >= min) && self.max.is_none_or(|max| position <= max)
    }

    /// Shrink the bound on the side of `target` to the stall position `reached`.
    ///
    /// The interval never widens and never inverts. Returns true when a bound
    /// changed.
    pub fn narrow_toward(&mut self, target: i64, reached: i64) -> bool {
        if target > reached {
            let mut bound = reached;
            if let Some(min) = self.min {
                bound = bound.max(min);
            }
            if self.max.is_some_and(|max| max <= bound) {
                return false;
            }
            self.max = Some(bound);
            true
        } else if target < reached {
            let mut bound = reached;
            if let Some(max) = self.max {
                bound = bound.min(max);
            }
            if self.min.is_some_and(|min| min >= bound) {
                return false;
            }
            self.min = Some(bound);
            true
        } else {
            false
        }
    }
}

impl fmt::Display for AxisRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.min {
            Some(min) => write!(f, "[{min}, ")?,
            None => write!(f, "[?, ")?,
        }
        match self.max {
            Some(max) => write!(f, "{max}]"),
            None => write!(f, "?]"),
        }
    }
}

/// Motion state of one axis as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionFlag {
    /// Motion output disabled
    #[default]
    Idle,
    /// Motion output enabled, axis travelling toward its target
    Moving,
}

/// Per-axis state owned by a motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisState {
    /// Last read position
    pub position: i64,
    /// Settle tolerance (>= 0)
    pub target_range: i64,
    /// Known travel interval
    pub range: AxisRange,
    /// Motion flag
    pub motion: MotionFlag,
}

/// Snapshot of a connected positioning device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Number of axes, fixed at connect
    pub num_axes: usize,
    /// Origin used for deviations and `restore`
    pub start_position: Vec<i64>,
    /// Last read position
    pub position: Vec<i64>,
    /// `position - start_position`, computed per read
    pub deviation: Vec<i64>,
    /// Per-axis travel intervals
    pub range: Vec<AxisRange>,
}

/// Subset of [`DeviceInfo`] fixed by `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitInfo {
    /// Number of axes
    pub num_axes: usize,
    /// Origin used for deviations and `restore`
    pub start_position: Vec<i64>,
    /// Per-axis travel intervals
    pub range: Vec<AxisRange>,
}
