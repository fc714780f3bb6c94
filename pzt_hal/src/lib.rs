//! # PZT HAL Library
//!
//! Motion control for piezo positioning stages and arbitration of shared
//! laboratory devices.
//!
//! Drivers implement the `ActuatorDriver` trait defined in
//! `pzt_common::hal::driver`; the [`motion`] module turns any driver into a
//! [`MotionController`] with move/settle, end-of-travel detection and range
//! narrowing. The [`registry`] owns every live device and serializes access
//! to each of them.
//!
//! # Module Structure
//!
//! - [`motion`] - `PiezoStage` and the move/settle state machine
//! - [`registry`] - `DeviceRegistry`, one live device per `(type, name)`
//! - [`device`] - Device handles, operations and responses
//! - [`drivers`] - Controller families (Attocube AMC, PI GCS, simulator)
//! - [`transport`] - JSON-RPC and line-oriented transport clients
//! - [`shutter`] - Thorlabs SC10 shutter device
//! - [`experiment`] - Experiment runner and position refresh loop
//! - [`config`] - Application configuration file
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Refresh loop / Experiment threads                               │
//! │                 │  invoke(type, name, operation)                 │
//! │                 ▼                                                │
//! │  ┌──────────────────────────┐                                    │
//! │  │  DeviceRegistry          │  map lock only                     │
//! │  └───────────┬──────────────┘                                    │
//! │              ▼                                                   │
//! │  ┌──────────────────────────┐    ┌────────────────────────────┐  │
//! │  │  PiezoStage / Sc10Shutter│───►│  ActuatorDriver / Transport│  │
//! │  │  (device mutex)          │    │  (AMC, GCS, SC10, sim)     │  │
//! │  └──────────────────────────┘    └────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod device;
pub mod drivers;
pub mod experiment;
pub mod motion;
pub mod registry;
pub mod shutter;
pub mod transport;

// Re-export key types for convenience
pub use crate::device::{Device, DeviceFamily, DeviceType, Operation, Response};
pub use crate::experiment::{Experiment, RefreshLoop};
pub use crate::motion::{MotionController, PiezoStage};
pub use crate::registry::{DeviceRegistry, RegisteredNames, RegistryError};
pub use crate::shutter::{Sc10Shutter, ShutterInfo, ShutterMode};
