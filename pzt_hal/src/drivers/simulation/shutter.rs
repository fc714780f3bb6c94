//! Simulated Thorlabs SC10 shutter controller.

use super::stream::{Dialect, SimConnector};
use crate::transport::Protocol;
use pzt_common::hal::consts::{SC10_MAX_DURATION_MS, SC10_MAX_REPEAT, SC10_MIN_REPEAT};
use pzt_common::hal::driver::HalError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct ShutterModel {
    enabled: bool,
    mode: u32,
    open_ms: u32,
    shut_ms: u32,
    repeat: u32,
    requests: u64,
    refuse_connections: bool,
}

/// Shared handle on a simulated SC10.
#[derive(Debug, Clone)]
pub struct ShutterSimulator {
    state: Arc<Mutex<ShutterModel>>,
}

impl Default for ShutterSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutterSimulator {
    /// Disabled shutter in manual mode.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ShutterModel {
                enabled: false,
                mode: 1,
                open_ms: 100,
                shut_ms: 100,
                repeat: 1,
                requests: 0,
                refuse_connections: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ShutterModel> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the shutter output is enabled.
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Number of requests answered so far.
    pub fn request_count(&self) -> u64 {
        self.lock().requests
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Connector speaking the SC10 line protocol.
    pub fn connector(&self) -> SimConnector<Sc10Dialect> {
        SimConnector::new(Sc10Dialect(self.clone()), Protocol::Sc10)
    }
}

/// SC10 line protocol: echo, optional value line, prompt.
#[derive(Debug, Clone)]
pub struct Sc10Dialect(ShutterSimulator);

impl Sc10Dialect {
    fn query(state: &ShutterModel, key: &str) -> String {
        match key {
            "ens" => u8::from(state.enabled).to_string(),
            "mode" => state.mode.to_string(),
            "open" => state.open_ms.to_string(),
            "shut" => state.shut_ms.to_string(),
            "rep" => state.repeat.to_string(),
            _ => "CMD_NOT_DEFINED".to_string(),
        }
    }

    fn write(state: &mut ShutterModel, key: &str, value: Option<&str>) -> Option<&'static str> {
        if key == "ens" && value.is_none() {
            state.enabled = !state.enabled;
            return None;
        }
        let slot = match key {
            "mode" => &mut state.mode,
            "open" => &mut state.open_ms,
            "shut" => &mut state.shut_ms,
            "rep" => &mut state.repeat,
            _ => return Some("CMD_NOT_DEFINED"),
        };
        let range = match key {
            "mode" => 1..=5,
            "rep" => SC10_MIN_REPEAT..=SC10_MAX_REPEAT,
            _ => 0..=SC10_MAX_DURATION_MS,
        };
        match value.and_then(|v| v.parse::<u32>().ok()) {
            Some(n) if range.contains(&n) => {
                *slot = n;
                None
            }
            _ => Some("CMD_ARG_INVALID"),
        }
    }
}

impl Dialect for Sc10Dialect {
    fn frame_len(&self, input: &[u8]) -> Option<usize> {
        input.iter().position(|&b| b == b'\r').map(|i| i + 1)
    }

    fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(frame);
        let command = text.trim_end_matches('\r');
        let mut state = self.0.lock();
        state.requests += 1;

        let answer = if let Some(key) = command.strip_suffix('?') {
            Some(Self::query(&state, key))
        } else {
            let (key, value) = match command.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (command, None),
            };
            Self::write(&mut state, key, value).map(str::to_string)
        };

        let mut out = format!("{command}\r");
        if let Some(answer) = answer {
            out.push_str(&answer);
            out.push('\r');
        }
        out.push_str("> ");
        out.into_bytes()
    }

    fn accept(&self) -> Result<(), HalError> {
        if self.0.lock().refuse_connections {
            return Err(HalError::HardwareFault(
                "simulated shutter refused the connection".to_string(),
            ));
        }
        Ok(())
    }
}
