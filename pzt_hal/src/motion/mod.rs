//! Piezo stage motion control.
//!
//! [`PiezoStage`] implements [`MotionController`] on top of any
//! `ActuatorDriver`. One mutex guards all stage state and is held for the
//! full duration of every operation, including the blocking settle loop,
//! so operations on one stage are totally ordered.
//!
//! # Error handling
//!
//! - Argument errors (`AxisCountMismatch`, `OutOfRange` against known
//!   bounds) are returned before any hardware call.
//! - Fatal errors (`HardwareFault`, `TimedOut`) close the stage; it reports
//!   `NotConnected` until `connect` succeeds again.
//! - Any other failure during a move disables motion on every axis before
//!   the error is returned. A panic inside the settle loop does the same
//!   while unwinding.

mod settle;

pub use settle::AxisOutcome;

use pzt_common::consts::DEFAULT_TARGET_RANGE;
use pzt_common::hal::config::{ConnectionParams, MoveTimeouts};
use pzt_common::hal::driver::{ActuatorDriver, HalError};
use pzt_common::hal::types::{AxisRange, AxisState, DeviceInfo, InitInfo, MotionFlag};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, error, info, warn};

/// Capability surface shared by every actuator family.
pub trait MotionController: Send + Sync {
    /// Local device name.
    fn name(&self) -> &str;

    /// Controller family of the underlying driver.
    fn family(&self) -> &'static str;

    /// Timeouts used when a move does not bring its own.
    fn timeouts(&self) -> MoveTimeouts;

    /// Open the connection and discover the axes. No-op when connected.
    fn connect(&self, params: &ConnectionParams) -> Result<(), HalError>;

    /// Whether a live connection exists.
    fn is_connected(&self) -> bool;

    /// Whether a move is in progress. Never blocks on the device lock.
    fn is_moving(&self) -> bool;

    /// Read every axis.
    fn position(&self) -> Result<Vec<i64>, HalError>;

    /// `position - centers`; `centers` defaults to the start position.
    fn deviation(&self, centers: Option<&[i64]>) -> Result<Vec<i64>, HalError>;

    /// Move to absolute `targets` and block until settled.
    fn move_to(&self, targets: &[i64], timeouts: &MoveTimeouts) -> Result<(), HalError>;

    /// Move back to the start position with default timeouts.
    fn restore(&self) -> Result<(), HalError>;

    /// Move to `centers - deviations`; `centers` defaults to the start
    /// position.
    fn apply_deviation(
        &self,
        deviations: &[i64],
        centers: Option<&[i64]>,
    ) -> Result<(), HalError>;

    /// Re-anchor the start position to `start`, or to the current position.
    fn set_start_position(&self, start: Option<&[i64]>) -> Result<(), HalError>;

    /// Axis count, start position and ranges.
    fn init_info(&self) -> Result<InitInfo, HalError>;

    /// Full snapshot after a fresh position read.
    fn info(&self) -> Result<DeviceInfo, HalError>;

    /// Disable motion and outputs, release the connection. Never fails.
    fn close(&self);
}

struct StageState<D> {
    driver: D,
    connected: bool,
    axes: Vec<AxisState>,
    start_position: Vec<i64>,
}

impl<D: ActuatorDriver> StageState<D> {
    fn require_connected(&self) -> Result<(), HalError> {
        if self.connected {
            Ok(())
        } else {
            Err(HalError::NotConnected)
        }
    }

    fn check_len(&self, actual: usize) -> Result<(), HalError> {
        if actual == self.axes.len() {
            Ok(())
        } else {
            Err(HalError::AxisCountMismatch {
                expected: self.axes.len(),
                actual,
            })
        }
    }

    fn ranges(&self) -> Vec<AxisRange> {
        self.axes.iter().map(|a| a.range).collect()
    }

    fn init(&mut self, params: &ConnectionParams) -> Result<(), HalError> {
        self.axes.clear();
        let num_axes = self.driver.axis_count(params)?;
        if let Some(start) = &params.start_position {
            if start.len() != num_axes {
                return Err(HalError::AxisCountMismatch {
                    expected: num_axes,
                    actual: start.len(),
                });
            }
        }

        for axis in 0..num_axes {
            // Tracked before enabling so a failed init still disables it.
            self.axes.push(AxisState::default());
            self.driver.set_output(axis, true)?;
            let range = self.driver.travel_range(axis)?;
            let target_range = match params.target_range {
                Some(range) => range,
                None => self
                    .driver
                    .target_range(axis)?
                    .unwrap_or(DEFAULT_TARGET_RANGE),
            };
            let position = self.driver.position(axis)?;
            self.axes[axis] = AxisState {
                position,
                target_range,
                range,
                motion: MotionFlag::Idle,
            };
        }

        self.start_position = match &params.start_position {
            Some(start) => start.clone(),
            None => self.axes.iter().map(|a| a.position).collect(),
        };
        Ok(())
    }

    fn read_positions(&mut self) -> Result<Vec<i64>, HalError> {
        self.require_connected()?;
        for axis in 0..self.axes.len() {
            self.axes[axis].position = self.driver.position(axis)?;
        }
        Ok(self.axes.iter().map(|a| a.position).collect())
    }

    fn halt_all(&mut self) {
        for axis in 0..self.axes.len() {
            if let Err(e) = self.driver.set_motion(axis, false) {
                debug!("Disabling motion on axis {axis} failed: {e}");
            }
            self.axes[axis].motion = MotionFlag::Idle;
        }
    }

    fn shutdown(&mut self) {
        for axis in 0..self.axes.len() {
            if let Err(e) = self.driver.set_motion(axis, false) {
                debug!("Disabling motion on axis {axis} failed: {e}");
            }
            if let Err(e) = self.driver.set_output(axis, false) {
                debug!("Disabling output on axis {axis} failed: {e}");
            }
        }
        self.driver.close();
        self.connected = false;
        self.axes.clear();
        self.start_position.clear();
    }

    fn init_info(&self) -> InitInfo {
        InitInfo {
            num_axes: self.axes.len(),
            start_position: self.start_position.clone(),
            range: self.ranges(),
        }
    }
}

/// `values - origins` per axis, refusing results outside `i64`.
fn offsets(values: &[i64], origins: &[i64]) -> Result<Vec<i64>, HalError> {
    values
        .iter()
        .zip(origins)
        .map(|(&value, &origin)| {
            value.checked_sub(origin).ok_or_else(|| {
                HalError::InvalidArgument(format!("{value} - {origin} is outside the i64 range"))
            })
        })
        .collect()
}

/// Marks the stage as moving for its lifetime.
///
/// Dropping it clears the moving flags. When dropped during a panic it
/// also disables motion on every axis.
struct MoveGuard<'a, D: ActuatorDriver> {
    state: &'a mut StageState<D>,
    moving: &'a AtomicBool,
}

impl<'a, D: ActuatorDriver> MoveGuard<'a, D> {
    fn start(state: &'a mut StageState<D>, moving: &'a AtomicBool) -> Self {
        for axis in &mut state.axes {
            axis.motion = MotionFlag::Moving;
        }
        moving.store(true, Ordering::SeqCst);
        Self { state, moving }
    }
}

impl<D: ActuatorDriver> Drop for MoveGuard<'_, D> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Panic during move, halting all axes");
            self.state.halt_all();
        }
        for axis in &mut self.state.axes {
            axis.motion = MotionFlag::Idle;
        }
        self.moving.store(false, Ordering::SeqCst);
    }
}

/// Piezo positioning stage driven through an [`ActuatorDriver`].
pub struct PiezoStage<D: ActuatorDriver> {
    name: String,
    family: &'static str,
    timeouts: MoveTimeouts,
    state: Mutex<StageState<D>>,
    moving: AtomicBool,
}

impl<D: ActuatorDriver> PiezoStage<D> {
    /// Disconnected stage named `name`.
    pub fn new(name: impl Into<String>, driver: D) -> Self {
        Self {
            name: name.into(),
            family: driver.family(),
            timeouts: MoveTimeouts::default(),
            state: Mutex::new(StageState {
                driver,
                connected: false,
                axes: Vec::new(),
                start_position: Vec::new(),
            }),
            moving: AtomicBool::new(false),
        }
    }

    /// Use `timeouts` for moves that carry none.
    pub fn with_timeouts(mut self, timeouts: MoveTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn lock(&self) -> MutexGuard<'_, StageState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the stage on fatal errors, then hand the error back.
    fn escalate(&self, state: &mut StageState<D>, err: HalError) -> HalError {
        if err.is_fatal() {
            error!(device = %self.name, "Fatal fault, closing: {err}");
            state.shutdown();
        }
        err
    }

    fn read_positions(&self, state: &mut StageState<D>) -> Result<Vec<i64>, HalError> {
        let result = state.read_positions();
        result.map_err(|e| self.escalate(state, e))
    }

    fn run_move(
        &self,
        state: &mut StageState<D>,
        targets: &[i64],
        timeouts: &MoveTimeouts,
    ) -> Result<(), HalError> {
        state.require_connected()?;
        state.check_len(targets.len())?;

        let outside: Vec<usize> = (0..targets.len())
            .filter(|&axis| !state.axes[axis].range.contains(targets[axis]))
            .collect();
        if !outside.is_empty() {
            warn!(device = %self.name, ?targets, "Targets outside known range on axes {outside:?}");
            return Err(HalError::OutOfRange {
                axes: outside,
                ranges: state.ranges(),
            });
        }

        debug!(device = %self.name, ?targets, "Moving");
        let result = {
            let mut guard = MoveGuard::start(state, &self.moving);
            let stage = &mut *guard.state;
            settle::settle(&mut stage.driver, &stage.axes, targets, timeouts)
        };

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(e) if e.is_fatal() => return Err(self.escalate(state, e)),
            Err(e) => {
                warn!(device = %self.name, "Move failed, halting all axes: {e}");
                state.halt_all();
                return Err(e);
            }
        };

        let mut stalled = Vec::new();
        for (axis, outcome) in outcomes.iter().enumerate() {
            state.axes[axis].position = outcome.position();
            if let AxisOutcome::EotStalled { position } = *outcome {
                let before = state.axes[axis].range;
                if state.axes[axis].range.narrow_toward(targets[axis], position) {
                    warn!(
                        device = %self.name,
                        axis,
                        "End of travel at {position}, range {before} narrowed to {}",
                        state.axes[axis].range
                    );
                } else {
                    warn!(device = %self.name, axis, "End of travel at {position}");
                }
                stalled.push(axis);
            }
        }

        if !stalled.is_empty() {
            state.halt_all();
            return Err(HalError::OutOfRange {
                axes: stalled,
                ranges: state.ranges(),
            });
        }
        debug!(device = %self.name, positions = ?outcomes, "On target");
        Ok(())
    }
}

impl<D: ActuatorDriver> MotionController for PiezoStage<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> &'static str {
        self.family
    }

    fn timeouts(&self) -> MoveTimeouts {
        self.timeouts
    }

    fn connect(&self, params: &ConnectionParams) -> Result<(), HalError> {
        let mut state = self.lock();
        if state.connected {
            debug!(device = %self.name, "Already connected");
            return Ok(());
        }
        params.validate()?;

        info!(device = %self.name, family = self.family, "Connecting");
        if let Err(e) = state.driver.open(params) {
            state.driver.close();
            return Err(e);
        }
        if let Err(e) = state.init(params) {
            error!(device = %self.name, "Initialization failed, closing: {e}");
            state.shutdown();
            return Err(e);
        }
        state.connected = true;
        info!(
            device = %self.name,
            axes = state.axes.len(),
            start = ?state.start_position,
            "Connected"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    fn position(&self) -> Result<Vec<i64>, HalError> {
        let mut state = self.lock();
        self.read_positions(&mut state)
    }

    fn deviation(&self, centers: Option<&[i64]>) -> Result<Vec<i64>, HalError> {
        let mut state = self.lock();
        state.require_connected()?;
        let centers = match centers {
            Some(centers) => {
                state.check_len(centers.len())?;
                centers.to_vec()
            }
            None => state.start_position.clone(),
        };
        let positions = self.read_positions(&mut state)?;
        offsets(&positions, &centers)
    }

    fn move_to(&self, targets: &[i64], timeouts: &MoveTimeouts) -> Result<(), HalError> {
        let mut state = self.lock();
        self.run_move(&mut state, targets, timeouts)
    }

    fn restore(&self) -> Result<(), HalError> {
        let mut state = self.lock();
        state.require_connected()?;
        let start = state.start_position.clone();
        self.run_move(&mut state, &start, &self.timeouts)
    }

    fn apply_deviation(
        &self,
        deviations: &[i64],
        centers: Option<&[i64]>,
    ) -> Result<(), HalError> {
        let mut state = self.lock();
        state.require_connected()?;
        state.check_len(deviations.len())?;
        let centers = match centers {
            Some(centers) => {
                state.check_len(centers.len())?;
                centers.to_vec()
            }
            None => state.start_position.clone(),
        };
        let targets = offsets(&centers, deviations)?;
        self.run_move(&mut state, &targets, &self.timeouts)
    }

    fn set_start_position(&self, start: Option<&[i64]>) -> Result<(), HalError> {
        let mut state = self.lock();
        state.require_connected()?;
        let start = match start {
            Some(start) => {
                state.check_len(start.len())?;
                start.to_vec()
            }
            None => self.read_positions(&mut state)?,
        };
        for (axis, &target) in start.iter().enumerate() {
            if let Err(e) = state.driver.set_target(axis, target) {
                return Err(self.escalate(&mut state, e));
            }
        }
        info!(device = %self.name, ?start, "Start position set");
        state.start_position = start;
        Ok(())
    }

    fn init_info(&self) -> Result<InitInfo, HalError> {
        let state = self.lock();
        state.require_connected()?;
        Ok(state.init_info())
    }

    fn info(&self) -> Result<DeviceInfo, HalError> {
        let mut state = self.lock();
        let position = self.read_positions(&mut state)?;
        let deviation = offsets(&position, &state.start_position)?;
        let init = state.init_info();
        Ok(DeviceInfo {
            num_axes: init.num_axes,
            start_position: init.start_position,
            position,
            deviation,
            range: init.range,
        })
    }

    fn close(&self) {
        let mut state = self.lock();
        if !state.connected {
            state.driver.close();
            return;
        }
        state.shutdown();
        info!(device = %self.name, "Closed");
    }
}

impl<D: ActuatorDriver> Drop for PiezoStage<D> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.connected {
            warn!(device = %self.name, "Stage dropped while connected, closing");
            state.shutdown();
        }
    }
}
