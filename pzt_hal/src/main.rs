//! # PZT HAL Binary
//!
//! Registers the configured devices, keeps their positions refreshed and
//! optionally runs a scan experiment until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run against the configured hardware
//! pzt_hal --config pzt.toml
//!
//! # Replace every controller by the simulator, three scan cycles
//! pzt_hal --config pzt.toml --simulate --cycles 3
//!
//! # Verbose JSON logging
//! pzt_hal --config pzt.toml -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use pzt_common::config::{ConfigError, ConfigLoader, ConfigStore, LogLevel};
use pzt_hal::config::AppConfig;
use pzt_hal::{
    DeviceFamily, DeviceRegistry, DeviceType, Experiment, Operation, RefreshLoop, Response,
};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const START_POSITION_KEY: &str = "start_position";
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// PZT HAL - piezo stage control and device arbitration
#[derive(Parser, Debug)]
#[command(name = "pzt_hal")]
#[command(version)]
#[command(about = "Piezo stage motion control with a shared device registry")]
#[command(long_about = None)]
struct Args {
    /// Path to the application configuration file
    #[arg(short, long, default_value = "pzt.toml")]
    config: PathBuf,

    /// Replace every device family by the in-process simulator
    #[arg(short = 's', long)]
    simulate: bool,

    /// Number of scan cycles (overrides the configuration)
    #[arg(long)]
    cycles: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("PZT HAL failed: {}", e);
        eprintln!("pzt_hal: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;
    setup_tracing(&args, config.shared.log_level);
    config.validate()?;

    info!(
        "PZT HAL v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let constants = ConfigStore::new();
    if let Some(path) = &config.constants {
        match constants.load_file(path) {
            Ok(()) => info!("Loaded constants from {}", path.display()),
            Err(ConfigError::FileNotFound) => {
                info!("No constants at {}, starting fresh", path.display())
            }
            Err(e) => return Err(e.into()),
        }
    }

    let registry = Arc::new(DeviceRegistry::with_timeouts(
        config.experiment.move_timeouts(),
    ));
    register_devices(&registry, &config, &constants, args.simulate);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    let refresh = if config.refresh.enabled {
        Some(RefreshLoop::start(
            Arc::clone(&registry),
            config.refresh.period(),
        )?)
    } else {
        None
    };

    let experiment = match &config.experiment.actuator {
        Some(actuator) => start_scan(
            &registry,
            &config,
            actuator,
            args.cycles.or(config.experiment.cycles),
            Arc::clone(&running),
        )?,
        None => None,
    };

    while running.load(Ordering::SeqCst) {
        if experiment.as_ref().is_some_and(|e| !e.is_running()) {
            break;
        }
        std::thread::sleep(WAIT_SLICE);
    }

    if let Some(experiment) = experiment {
        experiment.stop();
        experiment.join();
    }
    if let Some(refresh) = refresh {
        refresh.stop();
    }

    record_start_positions(&registry, &constants);
    registry.unregister_all();
    if let Some(path) = &config.constants {
        constants.dump_file(path)?;
        info!("Constants written to {}", path.display());
    }

    info!("PZT HAL shutdown complete");
    Ok(())
}

/// Register and connect every configured device. Failures are logged and
/// leave the device registered but disconnected.
fn register_devices(
    registry: &DeviceRegistry,
    config: &AppConfig,
    constants: &ConfigStore,
    simulate: bool,
) {
    if simulate {
        info!("Simulation mode enabled");
    }
    for device in &config.devices {
        let family = if simulate {
            DeviceFamily::Simulated
        } else {
            device.family
        };
        registry.register(device.device_type, &device.name, family);

        let mut params = device.connection.clone();
        if device.device_type == DeviceType::Actuator && params.start_position.is_none() {
            match constants.get_as::<Vec<i64>>(&device.name, START_POSITION_KEY) {
                Ok(start) => params.start_position = start,
                Err(e) => warn!("Ignoring stored start position of '{}': {e}", device.name),
            }
        }
        if let Err(e) = registry.invoke(device.device_type, &device.name, Operation::Connect(params))
        {
            error!("{e}");
        }
    }
}

/// Scan `actuator` back and forth around its start position, with every
/// shutter enabled for the duration of the scan.
fn start_scan(
    registry: &Arc<DeviceRegistry>,
    config: &AppConfig,
    actuator: &str,
    cycles: Option<u64>,
    running: Arc<AtomicBool>,
) -> Result<Option<Experiment>, Box<dyn std::error::Error>> {
    let Some(Response::InitInfo(init)) =
        registry.invoke_best_effort(DeviceType::Actuator, actuator, Operation::InitInfo)
    else {
        warn!("Actuator '{actuator}' is not ready, scan skipped");
        return Ok(None);
    };

    let shutters: Vec<String> = config
        .devices_of(DeviceType::Shutter)
        .map(|d| d.name.clone())
        .collect();
    let amplitude = config.experiment.amplitude;
    let registry = Arc::clone(registry);
    let name = actuator.to_string();
    let mut step: u64 = 0;

    let experiment = Experiment::start("scan", move || {
        if step == 0 {
            for shutter in &shutters {
                registry.invoke_best_effort(DeviceType::Shutter, shutter, Operation::Enable);
            }
        }
        let done = cycles.is_some_and(|c| step >= c * 2);
        if done || !running.load(Ordering::SeqCst) {
            registry.invoke_best_effort(DeviceType::Actuator, &name, Operation::Restore);
            for shutter in &shutters {
                registry.invoke_best_effort(DeviceType::Shutter, shutter, Operation::Disable);
            }
            return ControlFlow::Break(());
        }

        let sign = if step % 2 == 0 { 1 } else { -1 };
        let deviations = vec![sign * amplitude; init.num_axes];
        registry.invoke_best_effort(
            DeviceType::Actuator,
            &name,
            Operation::ApplyDeviation {
                deviations,
                centers: None,
            },
        );
        if let Some(Response::Positions(deviation)) = registry.invoke_best_effort(
            DeviceType::Actuator,
            &name,
            Operation::GetDeviation(None),
        ) {
            info!(step, ?deviation, "Scan point reached");
        }
        step += 1;
        ControlFlow::Continue(())
    })?;
    Ok(Some(experiment))
}

/// Store each connected actuator's start position for the next run.
fn record_start_positions(registry: &DeviceRegistry, constants: &ConfigStore) {
    let names = registry
        .registered()
        .remove(&DeviceType::Actuator)
        .unwrap_or_default();
    for name in names {
        if let Some(Response::InitInfo(init)) =
            registry.invoke_best_effort(DeviceType::Actuator, &name, Operation::InitInfo)
        {
            constants.set(&name, START_POSITION_KEY, init.start_position);
        }
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
