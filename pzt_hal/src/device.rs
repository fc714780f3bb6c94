//! Device handles, operations and responses.
//!
//! A [`Device`] is a cheap, cloneable handle on one live device. Callers
//! describe what to do with an [`Operation`]; the device answers with a
//! [`Response`]. An operation the device kind does not support is reported
//! as `None` by [`Device::execute`], which the registry turns into
//! `RegistryError::UnsupportedOperation`.

use crate::motion::MotionController;
use crate::shutter::{Sc10Shutter, ShutterInfo, ShutterMode};
use pzt_common::hal::config::{ConnectionParams, MoveTimeouts};
use pzt_common::hal::driver::HalError;
use pzt_common::hal::types::{DeviceInfo, InitInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of device a registry entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Piezo positioning stage
    Actuator,
    /// Optical shutter
    Shutter,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Actuator => "actuator",
            Self::Shutter => "shutter",
        })
    }
}

/// Controller family used to build a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Attocube AMC over JSON-RPC
    Attocube,
    /// Physik Instrumente over GCS
    Pi,
    /// In-process simulator
    Simulated,
    /// Thorlabs SC10 shutter controller
    Sc10,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Attocube => "attocube",
            Self::Pi => "pi",
            Self::Simulated => "simulated",
            Self::Sc10 => "sc10",
        })
    }
}

/// Live device handle.
#[derive(Clone)]
pub enum Device {
    /// Positioning stage
    Actuator(Arc<dyn MotionController>),
    /// SC10 shutter
    Shutter(Arc<Sc10Shutter>),
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actuator(stage) => write!(f, "Actuator({})", stage.name()),
            Self::Shutter(shutter) => write!(f, "Shutter({})", shutter.name()),
        }
    }
}

/// Operation requested through the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Open the connection (any device)
    Connect(ConnectionParams),
    /// Release the connection (any device)
    Close,
    /// Whether the connection is open (any device)
    IsConnected,
    /// Whether a move is in progress
    IsMoving,
    /// Read all axes
    GetPosition,
    /// Position minus centers (default: start position)
    GetDeviation(Option<Vec<i64>>),
    /// Absolute move; `None` uses the stage timeouts
    Move {
        /// Per-axis targets
        targets: Vec<i64>,
        /// Move timing
        timeouts: Option<MoveTimeouts>,
    },
    /// Move back to the start position
    Restore,
    /// Move to `centers - deviations`
    ApplyDeviation {
        /// Per-axis deviations to undo
        deviations: Vec<i64>,
        /// Reference position (default: start position)
        centers: Option<Vec<i64>>,
    },
    /// Re-anchor the start position (default: current position)
    SetStartPosition(Option<Vec<i64>>),
    /// Axis count, start position, ranges
    InitInfo,
    /// Full snapshot (stage or shutter)
    Info,
    /// Enable the shutter output
    Enable,
    /// Disable the shutter output
    Disable,
    /// Whether the shutter output is enabled
    IsEnabled,
    /// Shutter mode
    GetMode,
    /// Change the shutter mode
    SetMode(ShutterMode),
    /// Shutter open period in ms
    GetOpenDuration,
    /// Change the open period
    SetOpenDuration(u32),
    /// Shutter shut period in ms
    GetShutDuration,
    /// Change the shut period
    SetShutDuration(u32),
    /// Repeat count
    GetRepeatCount,
    /// Change the repeat count
    SetRepeatCount(u32),
}

impl Operation {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Close => "close",
            Self::IsConnected => "isConnected",
            Self::IsMoving => "isMoving",
            Self::GetPosition => "getPosition",
            Self::GetDeviation(_) => "getDeviation",
            Self::Move { .. } => "move",
            Self::Restore => "restore",
            Self::ApplyDeviation { .. } => "applyDeviation",
            Self::SetStartPosition(_) => "setStartPosition",
            Self::InitInfo => "initInfo",
            Self::Info => "info",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::IsEnabled => "isEnabled",
            Self::GetMode => "getMode",
            Self::SetMode(_) => "setMode",
            Self::GetOpenDuration => "getOpenDuration",
            Self::SetOpenDuration(_) => "setOpenDuration",
            Self::GetShutDuration => "getShutDuration",
            Self::SetShutDuration(_) => "setShutDuration",
            Self::GetRepeatCount => "getRepeatCount",
            Self::SetRepeatCount(_) => "setRepeatCount",
        }
    }

    /// Convenience constructor for a move with default timeouts.
    pub fn move_to(targets: impl Into<Vec<i64>>) -> Self {
        Self::Move {
            targets: targets.into(),
            timeouts: None,
        }
    }
}

/// Result of a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Operation completed, nothing to report
    Done,
    /// Per-axis positions or deviations
    Positions(Vec<i64>),
    /// Stage setup
    InitInfo(InitInfo),
    /// Stage snapshot
    DeviceInfo(DeviceInfo),
    /// Shutter snapshot
    ShutterInfo(ShutterInfo),
    /// Boolean state
    Flag(bool),
    /// Shutter mode
    Mode(ShutterMode),
    /// Numeric setting
    Value(u32),
}

impl Response {
    /// Positions carried by the response, if any.
    pub fn into_positions(self) -> Option<Vec<i64>> {
        match self {
            Self::Positions(p) => Some(p),
            _ => None,
        }
    }
}

impl Device {
    /// Kind of this device.
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::Actuator(_) => DeviceType::Actuator,
            Self::Shutter(_) => DeviceType::Shutter,
        }
    }

    /// Local name of this device.
    pub fn name(&self) -> &str {
        match self {
            Self::Actuator(stage) => stage.name(),
            Self::Shutter(shutter) => shutter.name(),
        }
    }

    /// Release the connection. Never fails.
    pub fn close(&self) {
        match self {
            Self::Actuator(stage) => stage.close(),
            Self::Shutter(shutter) => shutter.close(),
        }
    }

    /// Run `operation`; `None` when this kind of device does not support it.
    pub fn execute(&self, operation: &Operation) -> Option<Result<Response, HalError>> {
        match self {
            Self::Actuator(stage) => execute_actuator(stage.as_ref(), operation),
            Self::Shutter(shutter) => execute_shutter(shutter, operation),
        }
    }
}

fn execute_actuator(
    stage: &dyn MotionController,
    operation: &Operation,
) -> Option<Result<Response, HalError>> {
    let done = |r: Result<(), HalError>| r.map(|()| Response::Done);
    Some(match operation {
        Operation::Connect(params) => done(stage.connect(params)),
        Operation::Close => {
            stage.close();
            Ok(Response::Done)
        }
        Operation::IsConnected => Ok(Response::Flag(stage.is_connected())),
        Operation::IsMoving => Ok(Response::Flag(stage.is_moving())),
        Operation::GetPosition => stage.position().map(Response::Positions),
        Operation::GetDeviation(centers) => {
            stage.deviation(centers.as_deref()).map(Response::Positions)
        }
        Operation::Move { targets, timeouts } => {
            let timeouts = timeouts.unwrap_or_else(|| stage.timeouts());
            done(stage.move_to(targets, &timeouts))
        }
        Operation::Restore => done(stage.restore()),
        Operation::ApplyDeviation {
            deviations,
            centers,
        } => done(stage.apply_deviation(deviations, centers.as_deref())),
        Operation::SetStartPosition(start) => done(stage.set_start_position(start.as_deref())),
        Operation::InitInfo => stage.init_info().map(Response::InitInfo),
        Operation::Info => stage.info().map(Response::DeviceInfo),
        _ => return None,
    })
}

fn execute_shutter(
    shutter: &Sc10Shutter,
    operation: &Operation,
) -> Option<Result<Response, HalError>> {
    let done = |r: Result<(), HalError>| r.map(|()| Response::Done);
    Some(match operation {
        Operation::Connect(params) => done(shutter.connect(params)),
        Operation::Close => {
            shutter.close();
            Ok(Response::Done)
        }
        Operation::IsConnected => Ok(Response::Flag(shutter.is_connected())),
        Operation::Info => shutter.info().map(Response::ShutterInfo),
        Operation::Enable => done(shutter.enable()),
        Operation::Disable => done(shutter.disable()),
        Operation::IsEnabled => shutter.is_enabled().map(Response::Flag),
        Operation::GetMode => shutter.mode().map(Response::Mode),
        Operation::SetMode(mode) => done(shutter.set_mode(*mode)),
        Operation::GetOpenDuration => shutter.open_duration().map(Response::Value),
        Operation::SetOpenDuration(ms) => done(shutter.set_open_duration(*ms)),
        Operation::GetShutDuration => shutter.shut_duration().map(Response::Value),
        Operation::SetShutDuration(ms) => done(shutter.set_shut_duration(*ms)),
        Operation::GetRepeatCount => shutter.repeat_count().map(Response::Value),
        Operation::SetRepeatCount(n) => done(shutter.set_repeat_count(*n)),
        _ => return None,
    })
}
