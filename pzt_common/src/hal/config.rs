//! Device connection configuration types.
//!
//! This module contains:
//! - `ConnectionParams` - How to reach a controller and how to initialize it
//! - `MoveTimeouts` - Timing of a single blocking move

use crate::consts::{
    DEFAULT_EOT_TIMEOUT, DEFAULT_IO_TIMEOUT_MS, DEFAULT_MOVE_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
use crate::hal::consts::MAX_AXES;
use crate::hal::driver::HalError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default function for io_timeout_ms
fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

/// Parameters handed to `connect`.
///
/// # TOML Example
///
/// ```toml
/// [devices.connection]
/// address = "192.168.1.1:9090"
/// num_axes = 3
/// start_position = [0, 0, 0]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// `host:port` of the controller, a serial device path, or `None` for
    /// the family default.
    #[serde(default)]
    pub address: Option<String>,

    /// Number of axes for controllers that cannot report it.
    #[serde(default)]
    pub num_axes: Option<usize>,

    /// Origin to use instead of the position read at connect.
    #[serde(default)]
    pub start_position: Option<Vec<i64>>,

    /// Settle tolerance overriding the controller's own.
    #[serde(default)]
    pub target_range: Option<i64>,

    /// Socket read/write timeout in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Baud rate for serial links.
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            address: None,
            num_axes: None,
            start_position: None,
            target_range: None,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            baud_rate: None,
        }
    }
}

impl ConnectionParams {
    /// Parameters reaching `address`, everything else default.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Socket timeout as a `Duration`.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Validate the parameters.
    ///
    /// # Errors
    ///
    /// Returns `HalError::ConfigError` if:
    /// - `num_axes` is zero or above `MAX_AXES`
    /// - `target_range` is negative
    /// - `io_timeout_ms` is zero
    pub fn validate(&self) -> Result<(), HalError> {
        if let Some(n) = self.num_axes.filter(|&n| n == 0 || n > MAX_AXES) {
            return Err(HalError::ConfigError(format!(
                "num_axes must be in 1..={MAX_AXES}, got {n}"
            )));
        }
        if let Some(range) = self.target_range.filter(|&r| r < 0) {
            return Err(HalError::ConfigError(format!(
                "target_range must not be negative, got {range}"
            )));
        }
        if self.io_timeout_ms == 0 {
            return Err(HalError::ConfigError(
                "io_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing of a single blocking move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveTimeouts {
    /// Give up when axes are still moving after this long.
    pub timeout: Duration,
    /// Window over which a moving axis must make progress.
    pub eot_timeout: Duration,
    /// Interval between two poll rounds.
    pub poll_interval: Duration,
}

impl Default for MoveTimeouts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_MOVE_TIMEOUT,
            eot_timeout: DEFAULT_EOT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl MoveTimeouts {
    /// Default timing with a different overall timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_params_defaults_from_toml() {
        let params: ConnectionParams = toml::from_str("address = \"10.0.0.2:9090\"").unwrap();
        assert_eq!(params.address.as_deref(), Some("10.0.0.2:9090"));
        assert_eq!(params.io_timeout_ms, DEFAULT_IO_TIMEOUT_MS);
        assert_eq!(params.num_axes, None);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_connection_params_rejects_zero_axes() {
        let params = ConnectionParams {
            num_axes: Some(0),
            ..ConnectionParams::default()
        };
        assert!(matches!(params.validate(), Err(HalError::ConfigError(_))));
    }

    #[test]
    fn test_connection_params_rejects_negative_tolerance() {
        let params = ConnectionParams {
            target_range: Some(-1),
            ..ConnectionParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_move_timeouts_default() {
        let t = MoveTimeouts::default();
        assert_eq!(t.timeout, Duration::from_secs(60));
        assert_eq!(t.eot_timeout, Duration::from_secs(1));
        assert_eq!(t.poll_interval, Duration::from_millis(100));
        assert_eq!(
            MoveTimeouts::with_timeout(Duration::from_secs(5)).poll_interval,
            t.poll_interval
        );
    }
}
