//! Motion controller integration tests.
//!
//! Runs `PiezoStage` over the real AMC and PI drivers and transports,
//! talking to the in-process stage simulator.

use pzt_common::hal::config::{ConnectionParams, MoveTimeouts};
use pzt_common::hal::driver::{ActuatorDriver, HalError};
use pzt_common::hal::types::AxisRange;
use pzt_hal::drivers::amc::{AmcDriver, methods};
use pzt_hal::drivers::pi::PiDriver;
use pzt_hal::drivers::simulation::StageSimulator;
use pzt_hal::{MotionController, PiezoStage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn fast() -> MoveTimeouts {
    MoveTimeouts {
        timeout: Duration::from_secs(2),
        eot_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
    }
}

fn params(num_axes: usize) -> ConnectionParams {
    ConnectionParams {
        num_axes: Some(num_axes),
        ..ConnectionParams::default()
    }
}

fn amc_stage(sim: &StageSimulator) -> PiezoStage<AmcDriver> {
    PiezoStage::new("stage", AmcDriver::new(Box::new(sim.amc_connector()))).with_timeouts(fast())
}

fn pi_stage(sim: &StageSimulator) -> PiezoStage<PiDriver> {
    PiezoStage::new("pi", PiDriver::new(Box::new(sim.gcs_connector()))).with_timeouts(fast())
}

fn assert_within(actual: &[i64], expected: &[i64], tolerance: i64) {
    assert_eq!(actual.len(), expected.len());
    for (axis, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "axis {axis}: {a} not within {tolerance} of {e}"
        );
    }
}

#[test]
fn test_connect_is_idempotent() {
    let sim = StageSimulator::new(3);
    let stage = amc_stage(&sim);
    stage.connect(&params(2)).unwrap();
    let before = stage.init_info().unwrap();
    let requests = sim.request_count();

    stage.connect(&params(2)).unwrap();

    assert_eq!(sim.request_count(), requests);
    assert_eq!(sim.connection_count(), 1);
    assert_eq!(stage.init_info().unwrap(), before);
}

#[test]
fn test_connect_enables_outputs_and_reads_start() {
    let sim = StageSimulator::new(3).with_position(1, 2500);
    let stage = amc_stage(&sim);
    assert!(!stage.is_connected());

    stage.connect(&params(2)).unwrap();

    assert!(stage.is_connected());
    assert!(sim.output_enabled(0) && sim.output_enabled(1));
    assert!(!sim.output_enabled(2));
    let init = stage.init_info().unwrap();
    assert_eq!(init.num_axes, 2);
    assert_eq!(init.start_position, vec![0, 2500]);
    assert!(init.range.iter().all(|r| !r.is_known()));
}

#[test]
fn test_refused_connection_leaves_stage_closed() {
    let sim = StageSimulator::new(1);
    sim.refuse_connections(true);
    let stage = amc_stage(&sim);

    let err = stage.connect(&params(1)).unwrap_err();

    assert!(matches!(err, HalError::HardwareFault(_)));
    assert!(!stage.is_connected());
    assert_eq!(stage.position().unwrap_err(), HalError::NotConnected);
}

#[test]
fn test_operations_require_connection() {
    let sim = StageSimulator::new(1);
    let stage = amc_stage(&sim);
    assert_eq!(stage.move_to(&[0], &fast()), Err(HalError::NotConnected));
    assert_eq!(stage.restore(), Err(HalError::NotConnected));
    assert_eq!(stage.info().unwrap_err(), HalError::NotConnected);
    assert_eq!(sim.request_count(), 0);
}

#[test]
fn test_move_settles_within_target_range() {
    let sim = StageSimulator::new(3);
    let stage = amc_stage(&sim);
    stage.connect(&params(2)).unwrap();

    for targets in [[100, 200], [250_000, -120_000], [-3_000, 7]] {
        stage.move_to(&targets, &fast()).unwrap();
        assert_within(&stage.position().unwrap(), &targets, 100);
    }
    assert!(!sim.motion_enabled(0));
    assert!(!stage.is_moving());
}

#[test]
fn test_wrong_axis_count_rejected_before_hardware() {
    let sim = StageSimulator::new(3);
    let stage = amc_stage(&sim);
    stage.connect(&params(2)).unwrap();
    let requests = sim.request_count();

    let err = stage.move_to(&[1, 2, 3], &fast()).unwrap_err();

    assert_eq!(
        err,
        HalError::AxisCountMismatch {
            expected: 2,
            actual: 3
        }
    );
    assert_eq!(sim.request_count(), requests);
    assert!(stage.is_connected());
}

#[test]
fn test_start_position_length_checked_at_connect() {
    let sim = StageSimulator::new(3);
    let stage = amc_stage(&sim);
    let p = ConnectionParams {
        start_position: Some(vec![0, 0, 0]),
        ..params(2)
    };

    assert!(matches!(
        stage.connect(&p),
        Err(HalError::AxisCountMismatch { .. })
    ));
    assert!(!stage.is_connected());
}

fn eot_scenario(eot_flags: bool) {
    let sim = StageSimulator::new(1)
        .with_limits(0, -5_000_000, 50)
        .with_eot_flags(eot_flags);
    let stage = amc_stage(&sim);
    let p = ConnectionParams {
        target_range: Some(10),
        ..params(1)
    };
    stage.connect(&p).unwrap();

    match stage.move_to(&[100], &fast()) {
        Err(HalError::OutOfRange { axes, ranges }) => {
            assert_eq!(axes, vec![0]);
            assert_eq!(ranges[0].max, Some(50));
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    assert!(stage.is_connected());
    assert!(!sim.motion_enabled(0));
    assert_eq!(stage.init_info().unwrap().range[0].max, Some(50));

    stage.move_to(&[40], &fast()).unwrap();
    assert_within(&stage.position().unwrap(), &[40], 10);
}

#[test]
fn test_eot_flag_narrows_range() {
    eot_scenario(true);
}

#[test]
fn test_stall_without_flags_narrows_range() {
    eot_scenario(false);
}

#[test]
fn test_narrowing_is_monotonic() {
    let sim = StageSimulator::new(1).with_limits(0, -30, 50);
    let stage = amc_stage(&sim);
    let p = ConnectionParams {
        target_range: Some(1),
        ..params(1)
    };
    stage.connect(&p).unwrap();

    assert!(stage.move_to(&[100], &fast()).is_err());
    assert!(stage.move_to(&[-100], &fast()).is_err());
    assert_eq!(stage.init_info().unwrap().range[0], AxisRange::new(-30, 50));

    // Hardware now allows more travel, but a known bound never re-widens.
    sim.set_limits(0, -5_000_000, 80);
    let requests = sim.request_count();
    match stage.move_to(&[70], &fast()) {
        Err(HalError::OutOfRange { axes, ranges }) => {
            assert_eq!(axes, vec![0]);
            assert_eq!(ranges[0], AxisRange::new(-30, 50));
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    assert_eq!(sim.request_count(), requests);

    // A tighter stall on the same side narrows further.
    sim.set_limits(0, -5_000_000, 45);
    assert!(stage.move_to(&[48], &fast()).is_err());
    assert_eq!(stage.init_info().unwrap().range[0], AxisRange::new(-30, 45));
}

#[test]
fn test_extreme_target_on_unknown_range_stalls_cleanly() {
    let sim = StageSimulator::new(1)
        .with_position(0, -10)
        .with_velocity(0.0);
    let stage = Arc::new(amc_stage(&sim));
    stage.connect(&params(1)).unwrap();

    let mover = {
        let stage = Arc::clone(&stage);
        thread::spawn(move || stage.move_to(&[i64::MAX], &fast()))
    };
    let result = mover.join().expect("move must not panic");

    match result {
        Err(HalError::OutOfRange { axes, ranges }) => {
            assert_eq!(axes, vec![0]);
            assert_eq!(ranges[0].max, Some(-10));
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    assert!(stage.is_connected());
    assert!(!stage.is_moving());
    assert!(!sim.motion_enabled(0));
}

#[test]
fn test_overflowing_offsets_rejected_before_hardware() {
    let sim = StageSimulator::new(1);
    let stage = amc_stage(&sim);
    stage.connect(&params(1)).unwrap();
    let requests = sim.request_count();

    assert!(matches!(
        stage.apply_deviation(&[i64::MIN], Some(&[1])),
        Err(HalError::InvalidArgument(_))
    ));
    assert!(matches!(
        stage.apply_deviation(&[-1], Some(&[i64::MAX])),
        Err(HalError::InvalidArgument(_))
    ));
    assert_eq!(sim.request_count(), requests);
    assert!(!sim.motion_enabled(0));

    assert!(matches!(
        stage.deviation(Some(&[i64::MIN])),
        Err(HalError::InvalidArgument(_))
    ));
    assert!(stage.is_connected());
    assert!(!stage.is_moving());
}

#[test]
fn test_sticky_moving_settles_on_tolerance() {
    let sim = StageSimulator::new(1).with_sticky_moving(true);
    let amc = amc_stage(&sim);
    let pi = pi_stage(&sim);
    let stages: [&dyn MotionController; 2] = [&amc, &pi];

    for (stage, target) in stages.into_iter().zip([10_000, -20_000]) {
        stage.connect(&params(1)).unwrap();
        let started = Instant::now();

        stage.move_to(&[target], &fast()).unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!sim.motion_enabled(0));
        assert!(!stage.is_moving());
        assert_within(&stage.position().unwrap(), &[target], 100);
        stage.close();
    }
}

/// Two-axis driver whose position reads fail (or panic) while motion is
/// enabled.
#[derive(Default)]
struct BusyReadDriver {
    engaged: Arc<AtomicBool>,
    halted: Arc<Mutex<Vec<usize>>>,
    panics: bool,
}

impl ActuatorDriver for BusyReadDriver {
    fn family(&self) -> &'static str {
        "busy"
    }

    fn open(&mut self, _params: &ConnectionParams) -> Result<(), HalError> {
        Ok(())
    }

    fn axis_count(&mut self, _params: &ConnectionParams) -> Result<usize, HalError> {
        Ok(2)
    }

    fn travel_range(&mut self, _axis: usize) -> Result<AxisRange, HalError> {
        Ok(AxisRange::unknown())
    }

    fn set_target(&mut self, _axis: usize, _target: i64) -> Result<(), HalError> {
        Ok(())
    }

    fn set_motion(&mut self, axis: usize, enabled: bool) -> Result<(), HalError> {
        if enabled {
            self.engaged.store(true, Ordering::SeqCst);
        } else {
            self.engaged.store(false, Ordering::SeqCst);
            self.halted.lock().unwrap().push(axis);
        }
        Ok(())
    }

    fn position(&mut self, _axis: usize) -> Result<i64, HalError> {
        if self.engaged.load(Ordering::SeqCst) {
            assert!(!self.panics, "position register corrupted");
            Err(HalError::InvalidArgument("position register busy".to_string()))
        } else {
            Ok(0)
        }
    }

    fn is_moving(&mut self, _axis: usize) -> Result<bool, HalError> {
        Ok(true)
    }

    fn close(&mut self) {}
}

#[test]
fn test_recoverable_error_during_move_halts_every_axis() {
    let driver = BusyReadDriver::default();
    let halted = Arc::clone(&driver.halted);
    let stage = PiezoStage::new("busy", driver).with_timeouts(fast());
    stage.connect(&params(2)).unwrap();
    assert!(halted.lock().unwrap().is_empty());

    let err = stage.move_to(&[10, 20], &fast()).unwrap_err();

    assert!(matches!(err, HalError::InvalidArgument(_)));
    let mut axes = halted.lock().unwrap().clone();
    axes.sort_unstable();
    axes.dedup();
    assert_eq!(axes, vec![0, 1]);
    assert!(stage.is_connected());
    assert!(!stage.is_moving());
    assert_eq!(stage.position().unwrap(), vec![0, 0]);
}

#[test]
fn test_panic_during_move_halts_every_axis() {
    let driver = BusyReadDriver {
        panics: true,
        ..BusyReadDriver::default()
    };
    let halted = Arc::clone(&driver.halted);
    let stage = Arc::new(PiezoStage::new("busy", driver).with_timeouts(fast()));
    stage.connect(&params(2)).unwrap();

    let mover = {
        let stage = Arc::clone(&stage);
        thread::spawn(move || stage.move_to(&[10, 20], &fast()))
    };
    assert!(mover.join().is_err());

    let mut axes = halted.lock().unwrap().clone();
    axes.sort_unstable();
    axes.dedup();
    assert_eq!(axes, vec![0, 1]);
    assert!(!stage.is_moving());
    assert!(stage.is_connected());
}

#[test]
fn test_move_timeout_closes_stage() {
    let sim = StageSimulator::new(1).with_velocity(1000.0);
    let stage = amc_stage(&sim);
    stage.connect(&params(1)).unwrap();
    let timeouts = MoveTimeouts {
        timeout: Duration::from_millis(100),
        eot_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(5),
    };

    let err = stage.move_to(&[1_000_000], &timeouts).unwrap_err();

    assert!(matches!(err, HalError::TimedOut { .. }));
    assert!(!stage.is_connected());
    assert!(!sim.output_enabled(0));
    assert_eq!(stage.position().unwrap_err(), HalError::NotConnected);
}

#[test]
fn test_fault_during_move_closes_until_reconnect() {
    let sim = StageSimulator::new(1);
    let stage = amc_stage(&sim);
    stage.connect(&params(1)).unwrap();
    sim.fail_on(methods::GET_STATUS_MOVING, 7);

    let err = stage.move_to(&[1_000_000], &fast()).unwrap_err();

    match err {
        HalError::HardwareFault(msg) => assert!(msg.contains("Simulated controller error 7")),
        other => panic!("expected HardwareFault, got {other:?}"),
    }
    assert!(!stage.is_connected());
    assert_eq!(stage.position().unwrap_err(), HalError::NotConnected);

    sim.clear_faults();
    stage.connect(&params(1)).unwrap();
    assert!(stage.position().is_ok());
}

#[test]
fn test_deviation_restore_and_apply() {
    let sim = StageSimulator::new(2);
    let stage = amc_stage(&sim);
    let p = ConnectionParams {
        start_position: Some(vec![1000, -2000]),
        ..params(2)
    };
    stage.connect(&p).unwrap();

    stage.apply_deviation(&[100, 100], None).unwrap();
    assert_within(&stage.position().unwrap(), &[900, -2100], 100);
    assert_within(&stage.deviation(None).unwrap(), &[-100, -100], 100);

    stage.apply_deviation(&[0, 500], Some(&[0, 0])).unwrap();
    assert_within(&stage.position().unwrap(), &[0, -500], 100);
    assert_within(&stage.deviation(Some(&[0, 0])).unwrap(), &[0, -500], 100);

    stage.restore().unwrap();
    assert_within(&stage.position().unwrap(), &[1000, -2000], 100);

    let info = stage.info().unwrap();
    assert_eq!(info.start_position, vec![1000, -2000]);
    assert_within(&info.deviation, &[0, 0], 100);
}

#[test]
fn test_set_start_position_reanchors() {
    let sim = StageSimulator::new(1);
    let stage = amc_stage(&sim);
    stage.connect(&params(1)).unwrap();
    stage.move_to(&[5000], &fast()).unwrap();

    stage.set_start_position(None).unwrap();
    let start = stage.init_info().unwrap().start_position;
    assert_within(&start, &[5000], 100);
    assert_within(&stage.deviation(None).unwrap(), &[0], 100);

    stage.set_start_position(Some(&[-10])).unwrap();
    assert_eq!(stage.init_info().unwrap().start_position, vec![-10]);
    assert!(matches!(
        stage.set_start_position(Some(&[1, 2])),
        Err(HalError::AxisCountMismatch { .. })
    ));
}

#[test]
fn test_is_moving_visible_while_move_blocks() {
    let sim = StageSimulator::new(1).with_velocity(100_000.0);
    let stage = Arc::new(amc_stage(&sim));
    stage.connect(&params(1)).unwrap();

    let mover = {
        let stage = Arc::clone(&stage);
        thread::spawn(move || stage.move_to(&[20_000], &fast()))
    };
    let deadline = Instant::now() + Duration::from_secs(1);
    let mut seen = false;
    while Instant::now() < deadline && !seen {
        seen = stage.is_moving();
        thread::sleep(Duration::from_millis(1));
    }

    assert!(seen);
    mover.join().unwrap().unwrap();
    assert!(!stage.is_moving());
}

#[test]
fn test_pi_stage_known_range() {
    let sim = StageSimulator::new(2).with_limits(0, -1000, 1000);
    let stage = pi_stage(&sim);
    stage.connect(&params(2)).unwrap();
    assert_eq!(stage.init_info().unwrap().range[0], AxisRange::new(-1000, 1000));
    let requests = sim.request_count();

    match stage.move_to(&[5000, 0], &fast()) {
        Err(HalError::OutOfRange { axes, .. }) => assert_eq!(axes, vec![0]),
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    assert_eq!(sim.request_count(), requests);

    stage.move_to(&[500, -250], &fast()).unwrap();
    assert_within(&stage.position().unwrap(), &[500, -250], 100);
}

#[test]
fn test_pi_axis_count_mismatch() {
    let sim = StageSimulator::new(2);
    let stage = pi_stage(&sim);
    assert!(matches!(
        stage.connect(&params(3)),
        Err(HalError::AxisCountMismatch {
            expected: 2,
            actual: 3
        })
    ));
    assert!(!stage.is_connected());
}

#[test]
fn test_close_disables_outputs() {
    let sim = StageSimulator::new(2);
    let stage = amc_stage(&sim);
    stage.connect(&params(2)).unwrap();

    stage.close();
    stage.close();

    assert!(!stage.is_connected());
    assert!(!sim.output_enabled(0) && !sim.output_enabled(1));
}
