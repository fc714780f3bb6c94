//! Device registry and arbiter.
//!
//! The registry owns exactly one live device per `(type, name)` and is the
//! single entry point used by every consumer thread. The map lock is held
//! only long enough to clone a device handle; the call itself runs under
//! the device's own mutex, so operations on one device are serialized while
//! different devices proceed in parallel.

use crate::device::{Device, DeviceFamily, DeviceType, Operation, Response};
use crate::drivers::build_device;
use pzt_common::hal::config::MoveTimeouts;
use pzt_common::hal::driver::HalError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Registered device names grouped by type.
pub type RegisteredNames = BTreeMap<DeviceType, BTreeSet<String>>;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    /// No device registered under this key.
    #[error("No {device_type} named '{name}' is registered")]
    NoDevice {
        /// Requested type
        device_type: DeviceType,
        /// Requested name
        name: String,
    },

    /// The device does not implement the operation.
    #[error("{device_type} '{name}' does not support '{operation}'")]
    UnsupportedOperation {
        /// Device type
        device_type: DeviceType,
        /// Device name
        name: String,
        /// Operation name
        operation: &'static str,
    },

    /// The device reported an error.
    #[error("{device_type} '{name}' failed '{operation}': {source}")]
    Operation {
        /// Device type
        device_type: DeviceType,
        /// Device name
        name: String,
        /// Operation name
        operation: &'static str,
        /// Driver error
        #[source]
        source: HalError,
    },
}

impl RegistryError {
    /// Driver error behind an operation failure.
    pub fn hal_error(&self) -> Option<&HalError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

type Key = (DeviceType, String);

/// Owner of every live device.
///
/// Shared between threads as `Arc<DeviceRegistry>`.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<Key, Device>>,
    timeouts: MoveTimeouts,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Empty registry; stages use the default move timeouts.
    pub fn new() -> Self {
        Self::with_timeouts(MoveTimeouts::default())
    }

    /// Empty registry whose stages use `timeouts` for operations that carry none.
    pub fn with_timeouts(timeouts: MoveTimeouts) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            timeouts,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Key, Device>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Key, Device>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build and register a device of `device_type` from `family`.
    ///
    /// Registering an existing `(type, name)` is a no-op. A family that does
    /// not provide `device_type` is logged and leaves the registry unchanged.
    pub fn register(
        &self,
        device_type: DeviceType,
        name: &str,
        family: DeviceFamily,
    ) -> RegisteredNames {
        if self.contains(device_type, name) {
            warn!("{device_type} '{name}' is already registered");
            return self.registered();
        }
        match build_device(device_type, name, family, self.timeouts) {
            Some(device) => self.insert(device_type, name, device),
            None => warn!("Family '{family}' provides no {device_type}; '{name}' not registered"),
        }
        self.registered()
    }

    /// Register an already built device.
    pub fn register_device(
        &self,
        device_type: DeviceType,
        name: &str,
        device: Device,
    ) -> RegisteredNames {
        if device.device_type() != device_type {
            warn!(
                "Device '{name}' is a {}, not a {device_type}; not registered",
                device.device_type()
            );
            return self.registered();
        }
        self.insert(device_type, name, device);
        self.registered()
    }

    fn insert(&self, device_type: DeviceType, name: &str, device: Device) {
        let mut devices = self.write();
        let key = (device_type, name.to_string());
        if devices.contains_key(&key) {
            warn!("{device_type} '{name}' is already registered");
            return;
        }
        devices.insert(key, device);
        info!("Registered {device_type} '{name}'");
    }

    fn lookup(&self, device_type: DeviceType, name: &str) -> Option<Device> {
        self.read().get(&(device_type, name.to_string())).cloned()
    }

    /// Run `operation` on a device, propagating every failure.
    pub fn invoke(
        &self,
        device_type: DeviceType,
        name: &str,
        operation: Operation,
    ) -> Result<Response, RegistryError> {
        let device = self
            .lookup(device_type, name)
            .ok_or_else(|| RegistryError::NoDevice {
                device_type,
                name: name.to_string(),
            })?;

        debug!("{device_type} '{name}': {}", operation.name());
        match device.execute(&operation) {
            None => Err(RegistryError::UnsupportedOperation {
                device_type,
                name: name.to_string(),
                operation: operation.name(),
            }),
            Some(result) => result.map_err(|source| RegistryError::Operation {
                device_type,
                name: name.to_string(),
                operation: operation.name(),
                source,
            }),
        }
    }

    /// Run `operation`, logging any failure and returning `None` instead.
    pub fn invoke_best_effort(
        &self,
        device_type: DeviceType,
        name: &str,
        operation: Operation,
    ) -> Option<Response> {
        match self.invoke(device_type, name, operation) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    }

    /// Close and remove a device.
    pub fn unregister(&self, device_type: DeviceType, name: &str) {
        let removed = self.write().remove(&(device_type, name.to_string()));
        match removed {
            Some(device) => {
                device.close();
                info!("Unregistered {device_type} '{name}'");
            }
            None => warn!("Cannot unregister {device_type} '{name}': not registered"),
        }
    }

    /// Close and remove every device.
    pub fn unregister_all(&self) {
        let devices: Vec<(Key, Device)> = self.write().drain().collect();
        for ((device_type, name), device) in devices {
            device.close();
            info!("Unregistered {device_type} '{name}'");
        }
    }

    /// Names of every registered device, grouped by type.
    pub fn registered(&self) -> RegisteredNames {
        let mut names = RegisteredNames::new();
        for (device_type, name) in self.read().keys() {
            names.entry(*device_type).or_default().insert(name.clone());
        }
        names
    }

    /// Whether `(device_type, name)` is registered.
    pub fn contains(&self, device_type: DeviceType, name: &str) -> bool {
        self.read().contains_key(&(device_type, name.to_string()))
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.unregister_all();
    }
}
