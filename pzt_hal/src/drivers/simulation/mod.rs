//! Simulation module.
//!
//! Software controllers for development and testing without physical
//! hardware. The simulators answer on the byte level, so the production
//! transports and drivers run unchanged on top of them.

mod physics;
mod shutter;
mod stage;
mod stream;

pub use physics::AxisModel;
pub use shutter::{Sc10Dialect, ShutterSimulator};
pub use stage::{
    AMC_ERR_INVALID_AXIS, AmcDialect, GCS_ERR_POS_OUT_OF_LIMITS, GcsDialect, StageSimulator,
};
pub use stream::{Dialect, SimConnector, SimStream};

use super::amc::AmcDriver;
use pzt_common::hal::consts::MAX_AXES;

/// AMC driver talking to a fresh simulated controller.
///
/// The controller exposes the largest supported axis count; the axes in use
/// follow `num_axes` of the connection parameters.
pub fn create_driver() -> AmcDriver {
    AmcDriver::new(Box::new(StageSimulator::new(MAX_AXES).amc_connector()))
}
