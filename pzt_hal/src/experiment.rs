//! Experiment runner and position refresh loop.
//!
//! Both run on their own OS thread and talk to devices only through the
//! shared [`DeviceRegistry`].

use crate::device::{DeviceType, Operation};
use crate::registry::DeviceRegistry;
use std::collections::BTreeMap;
use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const STOP_CHECK_SLICE: Duration = Duration::from_millis(10);

/// Sleep for `period`, returning early once `stop` is set.
fn sleep_unless_stopped(stop: &AtomicBool, period: Duration) {
    let deadline = Instant::now() + period;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_CHECK_SLICE));
    }
}

/// A step closure run repeatedly on a dedicated thread.
///
/// The loop ends when [`stop`](Self::stop) is called or when the step
/// returns `ControlFlow::Break`.
pub struct Experiment {
    name: String,
    stop: Arc<AtomicBool>,
    iterations: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Experiment {
    /// Spawn the experiment thread.
    pub fn start<F>(name: impl Into<String>, mut step: F) -> io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));
        let iterations = Arc::new(AtomicU64::new(0));

        let thread_stop = Arc::clone(&stop);
        let thread_iterations = Arc::clone(&iterations);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("experiment-{name}"))
            .spawn(move || {
                info!("Experiment '{thread_name}' started");
                while !thread_stop.load(Ordering::Acquire) {
                    let flow = step();
                    thread_iterations.fetch_add(1, Ordering::Relaxed);
                    if flow.is_break() {
                        break;
                    }
                }
                thread_stop.store(true, Ordering::Release);
                info!(
                    "Experiment '{thread_name}' finished after {} steps",
                    thread_iterations.load(Ordering::Relaxed)
                );
            })?;

        Ok(Self {
            name,
            stop,
            iterations,
            handle: Some(handle),
        })
    }

    /// Experiment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to end after the current step.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether a stop was requested or the loop ended on its own.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Whether the thread is still executing.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Completed steps so far.
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Wait for the thread to finish.
    pub fn join(mut self) {
        self.wait();
    }

    fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Experiment '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for Experiment {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

/// Latest positions per actuator name.
pub type PositionSnapshot = BTreeMap<String, Vec<i64>>;

/// Periodic best-effort position polling of every registered actuator.
///
/// Failures are logged by the registry and leave the previous reading in
/// place.
pub struct RefreshLoop {
    positions: Arc<Mutex<PositionSnapshot>>,
    stop: Arc<AtomicBool>,
    runner: Experiment,
}

impl RefreshLoop {
    /// Start polling every `period`.
    pub fn start(registry: Arc<DeviceRegistry>, period: Duration) -> io::Result<Self> {
        let positions = Arc::new(Mutex::new(PositionSnapshot::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let shared = Arc::clone(&positions);
        let thread_stop = Arc::clone(&stop);
        let runner = Experiment::start("refresh", move || {
            let names = registry
                .registered()
                .remove(&DeviceType::Actuator)
                .unwrap_or_default();
            for name in names {
                let reading = registry
                    .invoke_best_effort(DeviceType::Actuator, &name, Operation::GetPosition)
                    .and_then(|r| r.into_positions());
                if let Some(position) = reading {
                    debug!("{name}: {position:?}");
                    shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(name, position);
                }
            }
            sleep_unless_stopped(&thread_stop, period);
            if thread_stop.load(Ordering::Acquire) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        Ok(Self {
            positions,
            stop,
            runner,
        })
    }

    /// Copy of the latest readings.
    pub fn positions(&self) -> PositionSnapshot {
        self.positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Completed polling rounds.
    pub fn rounds(&self) -> u64 {
        self.runner.iterations()
    }

    /// Stop polling and wait for the thread.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Release);
        self.runner.stop();
        self.runner.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFamily;
    use pzt_common::hal::config::ConnectionParams;

    #[test]
    fn test_experiment_breaks_on_its_own() {
        let mut left = 3;
        let experiment = Experiment::start("count", move || {
            left -= 1;
            if left == 0 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        while experiment.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(experiment.is_stopped());
        assert_eq!(experiment.iterations(), 3);
        experiment.join();
    }

    #[test]
    fn test_experiment_stop() {
        let experiment = Experiment::start("spin", || {
            thread::sleep(Duration::from_millis(1));
            ControlFlow::Continue(())
        })
        .unwrap();
        assert!(!experiment.is_stopped());
        experiment.stop();
        assert!(experiment.is_stopped());
        experiment.join();
    }

    #[test]
    fn test_refresh_loop_reads_positions() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.register(DeviceType::Actuator, "stage", DeviceFamily::Simulated);
        registry.register(DeviceType::Actuator, "idle", DeviceFamily::Simulated);
        let params = ConnectionParams {
            num_axes: Some(2),
            ..ConnectionParams::default()
        };
        registry
            .invoke(DeviceType::Actuator, "stage", Operation::Connect(params))
            .unwrap();

        let refresh = RefreshLoop::start(Arc::clone(&registry), Duration::from_millis(5)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while refresh.rounds() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let positions = refresh.positions();
        refresh.stop();

        // "idle" never connected, so only the connected stage has a reading
        assert_eq!(positions.len(), 1);
        assert_eq!(positions["stage"], vec![0, 0]);
    }
}
