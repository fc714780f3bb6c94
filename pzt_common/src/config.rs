//! Configuration loading traits and types.
//!
//! This module provides:
//! - `ConfigLoader` - Load any deserializable struct from a TOML file
//! - `SharedConfig` / `LogLevel` - Fields common to every application file
//! - `ConfigStore` - Thread-safe two-level store of experiment constants,
//!   persisted as JSON
//!
//! # Usage
//!
//! ```rust,no_run
//! use pzt_common::config::{ConfigLoader, SharedConfig, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct MyAppConfig {
//!     shared: SharedConfig,
//!     port: u16,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MyAppConfig::load(Path::new("config.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Error type for configuration operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML or JSON parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Writing the configuration failed.
    #[error("Failed to write configuration: {0}")]
    WriteError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "pzt-bench-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: DeserializeOwned> ConfigLoader for T {}

/// One section of a [`ConfigStore`].
pub type Section = Map<String, Value>;

/// Thread-safe two-level store `section -> key -> value`.
///
/// Holds experiment constants (start positions, calibration values) that
/// outlive a single run. Missing sections and keys read as `None`.
///
/// # JSON Example
///
/// ```json
/// {
///   "stage": {
///     "start_position": [0, 0, 0]
///   }
/// }
/// ```
#[derive(Debug, Default)]
pub struct ConfigStore {
    sections: RwLock<BTreeMap<String, Section>>,
}

impl ConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Section>> {
        self.sections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Section>> {
        self.sections.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set `key` in `section`, creating the section if needed.
    pub fn set(&self, section: &str, key: &str, value: impl Into<Value>) {
        self.write()
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Merge `items` into `section`, creating it if needed.
    pub fn set_section(&self, section: &str, items: Section) {
        self.write()
            .entry(section.to_string())
            .or_default()
            .extend(items);
    }

    /// Value of `key` in `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<Value> {
        self.read().get(section)?.get(key).cloned()
    }

    /// Value of `key` in `section`, deserialized as `T`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` if the stored value does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        section: &str,
        key: &str,
    ) -> Result<Option<T>, ConfigError> {
        self.get(section, key)
            .map(|v| serde_json::from_value(v).map_err(|e| ConfigError::ParseError(e.to_string())))
            .transpose()
    }

    /// Copy of `section`.
    pub fn section(&self, section: &str) -> Option<Section> {
        self.read().get(section).cloned()
    }

    /// Copy of `section`, deserialized as `T`.
    pub fn section_as<T: DeserializeOwned>(&self, section: &str) -> Result<Option<T>, ConfigError> {
        self.section(section)
            .map(|s| {
                serde_json::from_value(Value::Object(s))
                    .map_err(|e| ConfigError::ParseError(e.to_string()))
            })
            .transpose()
    }

    /// Copy of the whole store.
    pub fn all(&self) -> BTreeMap<String, Section> {
        self.read().clone()
    }

    /// Load JSON from `reader`. Sections present in the input replace the
    /// stored sections of the same name; other sections are kept.
    pub fn load(&self, reader: impl Read) -> Result<(), ConfigError> {
        let parsed: BTreeMap<String, Section> =
            serde_json::from_reader(reader).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        self.write().extend(parsed);
        Ok(())
    }

    /// Load JSON from the file at `path`.
    pub fn load_file(&self, path: &Path) -> Result<(), ConfigError> {
        let file = std::fs::File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;
        self.load(std::io::BufReader::new(file))
    }

    /// Write the store to `writer` as pretty JSON.
    pub fn dump(&self, mut writer: impl Write) -> Result<(), ConfigError> {
        let sections = self.read();
        serde_json::to_writer_pretty(&mut writer, &*sections)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        writer
            .write_all(b"\n")
            .map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    /// Write the store to the file at `path`, replacing it.
    pub fn dump_file(&self, path: &Path) -> Result<(), ConfigError> {
        let file =
            std::fs::File::create(path).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        let mut writer = std::io::BufWriter::new(file);
        self.dump(&mut writer)?;
        writer
            .flush()
            .map_err(|e| ConfigError::WriteError(e.to_string()))
    }
}
