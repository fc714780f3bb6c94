//! Controller families.
//!
//! - [`amc`] - Attocube AMC over JSON-RPC
//! - [`pi`] - Physik Instrumente over GCS
//! - [`simulation`] - In-process controllers for development and testing
//!
//! # Adding New Families
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `ActuatorDriver` from `pzt_common::hal::driver`
//! 3. Add a `DeviceFamily` variant and map it in [`build_device`]

pub mod amc;
pub mod pi;
pub mod simulation;

use crate::device::{Device, DeviceFamily, DeviceType};
use crate::motion::PiezoStage;
use crate::shutter::Sc10Shutter;
use crate::transport::{Protocol, Sc10Connector, TcpConnector};
use pzt_common::hal::config::MoveTimeouts;
use pzt_common::hal::consts::{AMC_DEFAULT_PORT, GCS_DEFAULT_PORT};
use std::sync::Arc;

/// Build an unconnected device of `device_type` from `family`.
///
/// Returns `None` when the family has no device of that type.
pub fn build_device(
    device_type: DeviceType,
    name: &str,
    family: DeviceFamily,
    timeouts: MoveTimeouts,
) -> Option<Device> {
    let device = match (device_type, family) {
        (DeviceType::Actuator, DeviceFamily::Attocube) => {
            let connector = TcpConnector::new(Protocol::JsonRpc, AMC_DEFAULT_PORT);
            let stage = PiezoStage::new(name, amc::AmcDriver::new(Box::new(connector)))
                .with_timeouts(timeouts);
            Device::Actuator(Arc::new(stage))
        }
        (DeviceType::Actuator, DeviceFamily::Pi) => {
            let connector = TcpConnector::new(Protocol::Gcs, GCS_DEFAULT_PORT);
            let stage = PiezoStage::new(name, pi::PiDriver::new(Box::new(connector)))
                .with_timeouts(timeouts);
            Device::Actuator(Arc::new(stage))
        }
        (DeviceType::Actuator, DeviceFamily::Simulated) => {
            let stage = PiezoStage::new(name, simulation::create_driver()).with_timeouts(timeouts);
            Device::Actuator(Arc::new(stage))
        }
        (DeviceType::Shutter, DeviceFamily::Sc10) => {
            Device::Shutter(Arc::new(Sc10Shutter::new(name, Box::new(Sc10Connector))))
        }
        (DeviceType::Shutter, DeviceFamily::Simulated) => {
            let sim = simulation::ShutterSimulator::new();
            Device::Shutter(Arc::new(Sc10Shutter::new(name, Box::new(sim.connector()))))
        }
        _ => return None,
    };
    Some(device)
}
