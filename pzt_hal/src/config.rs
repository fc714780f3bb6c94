//! Application configuration file.
//!
//! # TOML Example
//!
//! ```toml
//! constants = "constants.json"
//!
//! [shared]
//! service_name = "pzt-bench-01"
//! log_level = "info"
//!
//! [refresh]
//! period_ms = 500
//!
//! [experiment]
//! actuator = "stage"
//! amplitude = 2000
//!
//! [[devices]]
//! type = "actuator"
//! name = "stage"
//! family = "attocube"
//! [devices.connection]
//! address = "192.168.1.10"
//! num_axes = 3
//!
//! [[devices]]
//! type = "shutter"
//! name = "laser"
//! family = "sc10"
//! [devices.connection]
//! address = "/dev/ttyUSB0"
//! ```

use crate::device::{DeviceFamily, DeviceType};
use pzt_common::config::{ConfigError, SharedConfig};
use pzt_common::consts::{
    DEFAULT_EOT_TIMEOUT, DEFAULT_MOVE_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_REFRESH_PERIOD_MS,
};
use pzt_common::hal::config::{ConnectionParams, MoveTimeouts};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

fn default_refresh_period_ms() -> u64 {
    DEFAULT_REFRESH_PERIOD_MS
}

fn default_true() -> bool {
    true
}

fn default_move_timeout_ms() -> u64 {
    DEFAULT_MOVE_TIMEOUT.as_millis() as u64
}

fn default_eot_timeout_ms() -> u64 {
    DEFAULT_EOT_TIMEOUT.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_amplitude() -> i64 {
    1000
}

/// Root of the application file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service name and log level.
    pub shared: SharedConfig,

    /// Devices to register at startup.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Position refresh loop.
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Demo experiment and move timing.
    #[serde(default)]
    pub experiment: ExperimentConfig,

    /// JSON file holding experiment constants across runs.
    #[serde(default)]
    pub constants: Option<PathBuf>,
}

/// One device entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device type.
    #[serde(rename = "type")]
    pub device_type: DeviceType,

    /// Registry name, unique per type.
    pub name: String,

    /// Controller family.
    pub family: DeviceFamily,

    /// Connection parameters.
    #[serde(default)]
    pub connection: ConnectionParams,
}

/// Position refresh settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Run the refresh loop.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Polling period in milliseconds.
    #[serde(default = "default_refresh_period_ms")]
    pub period_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: DEFAULT_REFRESH_PERIOD_MS,
        }
    }
}

impl RefreshConfig {
    /// Polling period.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Experiment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Actuator scanned by the demo experiment; none disables it.
    #[serde(default)]
    pub actuator: Option<String>,

    /// Offset in nm applied around the start position on every axis.
    #[serde(default = "default_amplitude")]
    pub amplitude: i64,

    /// Number of back-and-forth cycles; unlimited when absent.
    #[serde(default)]
    pub cycles: Option<u64>,

    /// Upper bound for one move.
    #[serde(default = "default_move_timeout_ms")]
    pub move_timeout_ms: u64,

    /// Stall window for end-of-travel detection.
    #[serde(default = "default_eot_timeout_ms")]
    pub eot_timeout_ms: u64,

    /// Settle poll period.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            actuator: None,
            amplitude: default_amplitude(),
            cycles: None,
            move_timeout_ms: default_move_timeout_ms(),
            eot_timeout_ms: default_eot_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ExperimentConfig {
    /// Move timing built from the millisecond fields.
    pub fn move_timeouts(&self) -> MoveTimeouts {
        MoveTimeouts {
            timeout: Duration::from_millis(self.move_timeout_ms),
            eot_timeout: Duration::from_millis(self.eot_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl AppConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the shared section is invalid
    /// - a device name is empty or a `(type, name)` pair repeats
    /// - a connection table is invalid
    /// - a period or timeout is zero
    /// - the experiment names an actuator that is not configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} name cannot be empty",
                    device.device_type
                )));
            }
            if !seen.insert((device.device_type, device.name.as_str())) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate {} '{}'",
                    device.device_type, device.name
                )));
            }
            device.connection.validate().map_err(|e| {
                ConfigError::ValidationError(format!("{} '{}': {e}", device.device_type, device.name))
            })?;
        }

        if self.refresh.period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "refresh.period_ms must be positive".to_string(),
            ));
        }
        let e = &self.experiment;
        if e.move_timeout_ms == 0 || e.eot_timeout_ms == 0 || e.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "experiment timeouts must be positive".to_string(),
            ));
        }
        if let Some(actuator) = &e.actuator {
            if !seen.contains(&(DeviceType::Actuator, actuator.as_str())) {
                return Err(ConfigError::ValidationError(format!(
                    "experiment actuator '{actuator}' is not configured"
                )));
            }
        }
        Ok(())
    }

    /// Device entries of one type.
    pub fn devices_of(&self, device_type: DeviceType) -> impl Iterator<Item = &DeviceConfig> {
        self.devices
            .iter()
            .filter(move |d| d.device_type == device_type)
    }
}
