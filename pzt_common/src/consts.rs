//! System-wide timing and range defaults.
//!
//! Single source of truth for the numeric defaults used by the motion
//! controller, the transports and the consumer loops.

use std::time::Duration;

/// Interval between two settle-poll rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Window over which a still-moving axis must make progress before it is
/// considered stalled against its end of travel.
pub const DEFAULT_EOT_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for a single blocking move.
pub const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Settle tolerance used when a controller cannot report its own.
pub const DEFAULT_TARGET_RANGE: i64 = 100;

/// Default read/write timeout for transport sockets, in milliseconds.
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 3000;

/// Default period of the position refresh loop, in milliseconds.
pub const DEFAULT_REFRESH_PERIOD_MS: u64 = 500;
