//! Actuator driver trait and error types.
//!
//! This module defines:
//! - `HalError` enum - Error types for device operations
//! - `EotFlags` - End-of-travel indicators reported by a controller
//! - `ActuatorDriver` trait - Interface for one controller family

use crate::hal::config::ConnectionParams;
use crate::hal::types::AxisRange;
use bitflags::bitflags;
use std::time::Duration;
use thiserror::Error;

/// Error types for device operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HalError {
    /// Operation requires a live connection
    #[error("Device not connected")]
    NotConnected,

    /// A per-axis vector has the wrong length
    #[error("Axis count mismatch: expected {expected}, got {actual}")]
    AxisCountMismatch {
        /// Number of axes of the device
        expected: usize,
        /// Length of the supplied vector
        actual: usize,
    },

    /// One or more targets lie outside the known travel range
    #[error("Target out of range on axes {axes:?} (ranges: {})", format_ranges(.ranges))]
    OutOfRange {
        /// Offending axis indices
        axes: Vec<usize>,
        /// Travel range of every axis after any narrowing
        ranges: Vec<AxisRange>,
    },

    /// Controller or transport reported a fault
    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    /// Axes still moving when the move timeout elapsed
    #[error("Move timed out after {timeout:?}")]
    TimedOut {
        /// Elapsed move timeout
        timeout: Duration,
    },

    /// Argument rejected before reaching the device
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl HalError {
    /// Returns true for errors after which the device is closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HardwareFault(_) | Self::TimedOut { .. })
    }
}

impl From<std::io::Error> for HalError {
    fn from(err: std::io::Error) -> Self {
        Self::HardwareFault(err.to_string())
    }
}

fn format_ranges(ranges: &[AxisRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

bitflags! {
    /// End-of-travel indicators of one axis.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EotFlags: u8 {
        /// Axis stopped at its forward (positive) end.
        const FORWARD  = 0x01;
        /// Axis stopped at its backward (negative) end.
        const BACKWARD = 0x02;
    }
}

impl Default for EotFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl EotFlags {
    /// Returns true when the flag matching a move from `from` to `to` is raised.
    pub fn blocks(&self, from: i64, to: i64) -> bool {
        if to > from {
            self.contains(Self::FORWARD)
        } else if to < from {
            self.contains(Self::BACKWARD)
        } else {
            false
        }
    }
}

/// Trait defining the interface for one actuator controller family.
///
/// The motion controller drives hardware only through this trait. Axis
/// indices are zero-based; drivers translate them to the controller's own
/// numbering.
///
/// # Lifecycle
///
/// 1. `open()` - Establish the transport
/// 2. `axis_count()`, `travel_range()`, `target_range()`, `set_output()` - Discovery
/// 3. `set_target()`, `set_motion()`, `position()`, `is_moving()`, `eot_flags()` - Moves
/// 4. `close()` - Release the transport, never fails
pub trait ActuatorDriver: Send {
    /// Returns the controller family identifier (e.g., "attocube", "pi").
    fn family(&self) -> &'static str;

    /// Open the connection described by `params`.
    fn open(&mut self, params: &ConnectionParams) -> Result<(), HalError>;

    /// Number of axes, queried from the controller or taken from `params`.
    fn axis_count(&mut self, params: &ConnectionParams) -> Result<usize, HalError>;

    /// Travel interval of `axis`. Unknown bounds are reported as `None`.
    fn travel_range(&mut self, axis: usize) -> Result<AxisRange, HalError>;

    /// Settle tolerance reported by the controller, if it has one.
    fn target_range(&mut self, _axis: usize) -> Result<Option<i64>, HalError> {
        Ok(None)
    }

    /// Enable or disable the output stage of `axis`.
    /// Default: no-op for controllers without a separate output stage.
    fn set_output(&mut self, _axis: usize, _enabled: bool) -> Result<(), HalError> {
        Ok(())
    }

    /// Set the target position of `axis` without starting motion.
    fn set_target(&mut self, axis: usize, target: i64) -> Result<(), HalError>;

    /// Enable or disable closed-loop motion toward the target of `axis`.
    fn set_motion(&mut self, axis: usize, enabled: bool) -> Result<(), HalError>;

    /// Current position of `axis`.
    fn position(&mut self, axis: usize) -> Result<i64, HalError>;

    /// Whether the controller reports `axis` as still moving.
    fn is_moving(&mut self, axis: usize) -> Result<bool, HalError>;

    /// End-of-travel flags of `axis`.
    /// Default: empty for controllers without EOT detection.
    fn eot_flags(&mut self, _axis: usize) -> Result<EotFlags, HalError> {
        Ok(EotFlags::empty())
    }

    /// Release the connection. Must be safe to call repeatedly.
    fn close(&mut self);
}
