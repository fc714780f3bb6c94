//! Hardware abstraction layer contracts and types.
//!
//! This module contains the actuator driver contract, the transport
//! contract, per-axis and per-device data types and connection settings
//! shared by every driver family.

pub mod config;
pub mod consts;
pub mod driver;
pub mod transport;
pub mod types;
