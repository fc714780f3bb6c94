//! Prelude module for common re-exports.
//!
//! # Usage
//!
//! ```rust
//! use pzt_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, ConfigStore, LogLevel, SharedConfig};

// ─── Timing defaults ────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_EOT_TIMEOUT, DEFAULT_MOVE_TIMEOUT, DEFAULT_POLL_INTERVAL};

// ─── Drivers & transports ───────────────────────────────────────────
pub use crate::hal::config::{ConnectionParams, MoveTimeouts};
pub use crate::hal::driver::{ActuatorDriver, EotFlags, HalError};
pub use crate::hal::transport::{Connector, Reply, Transport};

// ─── Axis & device data ─────────────────────────────────────────────
pub use crate::hal::types::{AxisRange, AxisState, DeviceInfo, InitInfo, MotionFlag};
