//! Thorlabs SC10 shutter device.
//!
//! Same lock discipline as the piezo stages: one mutex per shutter, held
//! for the whole operation. Values are validated before anything is sent.

use crate::transport::sc10::FAULT_ARG_INVALID;
use pzt_common::hal::config::ConnectionParams;
use pzt_common::hal::consts::{SC10_MAX_DURATION_MS, SC10_MAX_REPEAT, SC10_MIN_REPEAT};
use pzt_common::hal::driver::HalError;
use pzt_common::hal::transport::{Connector, Reply, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

/// SC10 operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterMode {
    /// Shutter follows the enable key
    Manual = 1,
    /// Open/shut cycle repeats indefinitely
    Auto = 2,
    /// One open period per enable
    Single = 3,
    /// `repeat_count` open periods per enable
    Repeat = 4,
    /// Shutter follows the external trigger input
    ExternalGate = 5,
}

impl ShutterMode {
    /// Every mode, in controller order.
    pub const ALL: [Self; 5] = [
        Self::Manual,
        Self::Auto,
        Self::Single,
        Self::Repeat,
        Self::ExternalGate,
    ];

    /// Controller mode number.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Mode for controller number `code`.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }
}

impl fmt::Display for ShutterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "Manual",
            Self::Auto => "Auto",
            Self::Single => "Single",
            Self::Repeat => "Repeat",
            Self::ExternalGate => "External Gate",
        })
    }
}

/// Snapshot of shutter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutterInfo {
    /// Output enabled
    pub enabled: bool,
    /// Operating mode
    pub mode: ShutterMode,
    /// Open period in ms
    pub open_ms: u32,
    /// Shut period in ms
    pub shut_ms: u32,
    /// Open periods per enable in `Repeat` mode
    pub repeat_count: u32,
}

struct ShutterState {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
}

impl ShutterState {
    fn call(&mut self, command: &str, args: &[Value]) -> Result<Reply, HalError> {
        let transport = self.transport.as_mut().ok_or(HalError::NotConnected)?;
        let reply = transport.invoke(command, args)?;
        match reply.fault {
            None => Ok(reply),
            Some(FAULT_ARG_INVALID) => Err(HalError::InvalidArgument(format!(
                "SC10 rejected {command} {args:?}"
            ))),
            Some(code) => Err(HalError::HardwareFault(format!(
                "SC10 {command} failed with fault {code}"
            ))),
        }
    }

    fn query(&mut self, key: &str) -> Result<u32, HalError> {
        let value = self.call(&format!("{key}?"), &[])?.i64_at(0)?;
        u32::try_from(value)
            .map_err(|_| HalError::HardwareFault(format!("SC10 {key}? returned {value}")))
    }

    fn write(&mut self, key: &str, value: u32) -> Result<(), HalError> {
        self.call(key, &[json!(value)]).map(drop)
    }

    fn is_enabled(&mut self) -> Result<bool, HalError> {
        Ok(self.query("ens")? != 0)
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), HalError> {
        if self.is_enabled()? != enabled {
            self.call("ens", &[])?;
        }
        Ok(())
    }

    fn mode(&mut self) -> Result<ShutterMode, HalError> {
        let code = self.query("mode")?;
        ShutterMode::from_code(code)
            .ok_or_else(|| HalError::HardwareFault(format!("SC10 reported unknown mode {code}")))
    }

    fn info(&mut self) -> Result<ShutterInfo, HalError> {
        Ok(ShutterInfo {
            enabled: self.is_enabled()?,
            mode: self.mode()?,
            open_ms: self.query("open")?,
            shut_ms: self.query("shut")?,
            repeat_count: self.query("rep")?,
        })
    }

    fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

/// SC10 shutter reached through a [`Connector`].
pub struct Sc10Shutter {
    name: String,
    state: Mutex<ShutterState>,
}

impl Sc10Shutter {
    /// Disconnected shutter named `name`.
    pub fn new(name: impl Into<String>, connector: Box<dyn Connector>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ShutterState {
                connector,
                transport: None,
            }),
        }
    }

    /// Local device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, ShutterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` under the lock; fatal errors close the connection.
    fn with<T>(
        &self,
        op: impl FnOnce(&mut ShutterState) -> Result<T, HalError>,
    ) -> Result<T, HalError> {
        let mut state = self.lock();
        let result = op(&mut *state);
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(device = %self.name, "Fatal fault, closing: {e}");
                state.close();
            }
        }
        result
    }

    /// Open the connection and read back the settings. No-op when connected.
    pub fn connect(&self, params: &ConnectionParams) -> Result<(), HalError> {
        let mut state = self.lock();
        if state.transport.is_some() {
            debug!(device = %self.name, "Already connected");
            return Ok(());
        }
        params.validate()?;
        let transport = state.connector.connect(params)?;
        state.transport = Some(transport);
        match state.info() {
            Ok(info) => {
                info!(device = %self.name, ?info, "Connected");
                Ok(())
            }
            Err(e) => {
                error!(device = %self.name, "Initialization failed, closing: {e}");
                state.close();
                Err(e)
            }
        }
    }

    /// Whether a live connection exists.
    pub fn is_connected(&self) -> bool {
        self.lock().transport.is_some()
    }

    /// Enable the output; no command is sent when already enabled.
    pub fn enable(&self) -> Result<(), HalError> {
        self.with(|s| s.set_enabled(true))
    }

    /// Disable the output; no command is sent when already disabled.
    pub fn disable(&self) -> Result<(), HalError> {
        self.with(|s| s.set_enabled(false))
    }

    /// Whether the output is enabled.
    pub fn is_enabled(&self) -> Result<bool, HalError> {
        self.with(ShutterState::is_enabled)
    }

    /// Current operating mode.
    pub fn mode(&self) -> Result<ShutterMode, HalError> {
        self.with(ShutterState::mode)
    }

    /// Disable the output, then switch to `mode`.
    pub fn set_mode(&self, mode: ShutterMode) -> Result<(), HalError> {
        self.with(|s| {
            s.set_enabled(false)?;
            s.write("mode", mode.code())
        })
    }

    /// Open period in ms.
    pub fn open_duration(&self) -> Result<u32, HalError> {
        self.with(|s| s.query("open"))
    }

    /// Set the open period in ms (at most 99 999).
    pub fn set_open_duration(&self, ms: u32) -> Result<(), HalError> {
        check_duration(ms)?;
        self.with(|s| s.write("open", ms))
    }

    /// Shut period in ms.
    pub fn shut_duration(&self) -> Result<u32, HalError> {
        self.with(|s| s.query("shut"))
    }

    /// Set the shut period in ms (at most 99 999).
    pub fn set_shut_duration(&self, ms: u32) -> Result<(), HalError> {
        check_duration(ms)?;
        self.with(|s| s.write("shut", ms))
    }

    /// Open periods per enable in `Repeat` mode.
    pub fn repeat_count(&self) -> Result<u32, HalError> {
        self.with(|s| s.query("rep"))
    }

    /// Set the repeat count (1 to 99).
    pub fn set_repeat_count(&self, count: u32) -> Result<(), HalError> {
        if !(SC10_MIN_REPEAT..=SC10_MAX_REPEAT).contains(&count) {
            return Err(HalError::InvalidArgument(format!(
                "repeat count must be in {SC10_MIN_REPEAT}..={SC10_MAX_REPEAT}, got {count}"
            )));
        }
        self.with(|s| s.write("rep", count))
    }

    /// All settings.
    pub fn info(&self) -> Result<ShutterInfo, HalError> {
        self.with(ShutterState::info)
    }

    /// Release the connection. Never fails.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.transport.is_some() {
            state.close();
            info!(device = %self.name, "Closed");
        }
    }
}

fn check_duration(ms: u32) -> Result<(), HalError> {
    if ms > SC10_MAX_DURATION_MS {
        return Err(HalError::InvalidArgument(format!(
            "duration must be at most {SC10_MAX_DURATION_MS} ms, got {ms}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::ShutterSimulator;

    fn connected(sim: &ShutterSimulator) -> Sc10Shutter {
        let shutter = Sc10Shutter::new("shutter", Box::new(sim.connector()));
        shutter.connect(&ConnectionParams::default()).unwrap();
        shutter
    }

    #[test]
    fn test_mode_codes() {
        for mode in ShutterMode::ALL {
            assert_eq!(ShutterMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(ShutterMode::from_code(0), None);
        assert_eq!(ShutterMode::ExternalGate.to_string(), "External Gate");
    }

    #[test]
    fn test_not_connected() {
        let sim = ShutterSimulator::new();
        let shutter = Sc10Shutter::new("shutter", Box::new(sim.connector()));
        assert_eq!(shutter.is_enabled(), Err(HalError::NotConnected));
    }

    #[test]
    fn test_enable_only_toggles_when_needed() {
        let sim = ShutterSimulator::new();
        let shutter = connected(&sim);
        shutter.enable().unwrap();
        assert!(sim.is_enabled());
        shutter.enable().unwrap();
        assert!(sim.is_enabled());
        shutter.disable().unwrap();
        assert!(!sim.is_enabled());
    }

    #[test]
    fn test_set_mode_disables_first() {
        let sim = ShutterSimulator::new();
        let shutter = connected(&sim);
        shutter.enable().unwrap();
        shutter.set_mode(ShutterMode::Repeat).unwrap();
        assert!(!sim.is_enabled());
        assert_eq!(shutter.mode().unwrap(), ShutterMode::Repeat);
    }

    #[test]
    fn test_limits_checked_before_sending() {
        let sim = ShutterSimulator::new();
        let shutter = connected(&sim);
        let before = sim.request_count();
        assert!(matches!(
            shutter.set_open_duration(100_000),
            Err(HalError::InvalidArgument(_))
        ));
        assert!(matches!(
            shutter.set_repeat_count(0),
            Err(HalError::InvalidArgument(_))
        ));
        assert_eq!(sim.request_count(), before);
        assert!(shutter.is_connected());
    }

    #[test]
    fn test_info_reflects_settings() {
        let sim = ShutterSimulator::new();
        let shutter = connected(&sim);
        shutter.set_open_duration(250).unwrap();
        shutter.set_shut_duration(99_999).unwrap();
        shutter.set_repeat_count(7).unwrap();
        let info = shutter.info().unwrap();
        assert_eq!(
            info,
            ShutterInfo {
                enabled: false,
                mode: ShutterMode::Manual,
                open_ms: 250,
                shut_ms: 99_999,
                repeat_count: 7,
            }
        );
    }

    #[test]
    fn test_connect_is_idempotent() {
        let sim = ShutterSimulator::new();
        let shutter = connected(&sim);
        let before = sim.request_count();
        shutter.connect(&ConnectionParams::default()).unwrap();
        assert_eq!(sim.request_count(), before);
    }
}
