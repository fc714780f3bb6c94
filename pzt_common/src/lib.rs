//! PZT Common Library
//!
//! Shared constants, error types, driver contracts and configuration
//! loading for the PZT stage control workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Timing defaults shared by every crate
//! - [`hal`] - Driver contract, transport contract, axis and device types
//! - [`config`] - TOML configuration loading and the JSON constants store
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use pzt_common::prelude::*;
//! use pzt_common::config::{ConfigLoader, SharedConfig};
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod consts;
pub mod hal;
pub mod prelude;
