//! Controller protocol constants.

/// Default TCP port of the Attocube AMC JSON-RPC server.
pub const AMC_DEFAULT_PORT: u16 = 9090;

/// Default TCP port of a PI GCS controller.
pub const GCS_DEFAULT_PORT: u16 = 50000;

/// Maximum number of axes any supported controller exposes.
pub const MAX_AXES: usize = 6;

/// Longest open or shut period accepted by the SC10 shutter, in ms.
pub const SC10_MAX_DURATION_MS: u32 = 99_999;

/// Smallest repeat count accepted by the SC10 shutter.
pub const SC10_MIN_REPEAT: u32 = 1;

/// Largest repeat count accepted by the SC10 shutter.
pub const SC10_MAX_REPEAT: u32 = 99;

/// Default baud rate of the SC10 serial interface.
pub const SC10_DEFAULT_BAUD: u32 = 9600;

/// Default TCP port of a serial-to-Ethernet bridge in front of an SC10.
pub const SC10_BRIDGE_DEFAULT_PORT: u16 = 4001;
