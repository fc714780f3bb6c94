//! Simulated multi-axis piezo controller.
//!
//! [`StageSimulator`] is a cloneable handle on shared controller state.
//! Tests keep one clone to inspect positions, count requests and inject
//! faults while a driver talks to another clone through either the AMC
//! JSON-RPC dialect or the PI GCS dialect.

use super::physics::AxisModel;
use super::stream::{Dialect, SimConnector};
use crate::drivers::amc::methods;
use crate::transport::Protocol;
use pzt_common::hal::driver::HalError;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// AMC result code for an axis index outside the controller.
pub const AMC_ERR_INVALID_AXIS: i64 = 2;

/// AMC result code for a malformed parameter.
pub const AMC_ERR_INVALID_PARAM: i64 = 4;

/// GCS error: unknown command.
pub const GCS_ERR_UNKNOWN_COMMAND: i64 = 2;

/// GCS error: target outside the travel limits.
pub const GCS_ERR_POS_OUT_OF_LIMITS: i64 = 7;

/// GCS error: move attempted with servo off.
pub const GCS_ERR_SERVO_OFF: i64 = 5;

/// GCS error: illegal axis identifier.
pub const GCS_ERR_INVALID_AXIS: i64 = 15;

/// GCS reports positions in µm; the model runs in nm.
const NM_PER_UM: f64 = 1000.0;

#[derive(Debug)]
struct StageModel {
    axes: Vec<AxisModel>,
    report_eot: bool,
    requests: u64,
    connections: u64,
    faults: HashMap<String, i64>,
    refuse_connections: bool,
    gcs_error: i64,
}

impl StageModel {
    fn advance(&mut self) {
        let now = Instant::now();
        for axis in &mut self.axes {
            axis.advance(now);
        }
    }
}

/// Shared handle on a simulated controller.
#[derive(Debug, Clone)]
pub struct StageSimulator {
    state: Arc<Mutex<StageModel>>,
}

impl StageSimulator {
    /// Controller with `num_axes` axes at position 0.
    pub fn new(num_axes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(StageModel {
                axes: (0..num_axes).map(|_| AxisModel::new()).collect(),
                report_eot: true,
                requests: 0,
                connections: 0,
                faults: HashMap::new(),
                refuse_connections: false,
                gcs_error: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StageModel> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the mechanical limits of `axis` in nm.
    pub fn with_limits(self, axis: usize, min: i64, max: i64) -> Self {
        self.set_limits(axis, min, max);
        self
    }

    /// Change the mechanical limits of `axis` while clients are connected.
    pub fn set_limits(&self, axis: usize, min: i64, max: i64) {
        if let Some(model) = self.lock().axes.get_mut(axis) {
            model.set_limits(min, max);
        }
    }

    /// Make every axis park short of its target and keep reporting
    /// "moving" until motion is disabled.
    pub fn with_sticky_moving(self, sticky: bool) -> Self {
        for axis in &mut self.lock().axes {
            axis.set_sticky(sticky);
        }
        self
    }

    /// Set the travel speed of every axis in nm/s.
    pub fn with_velocity(self, velocity: f64) -> Self {
        for axis in &mut self.lock().axes {
            axis.set_velocity(velocity);
        }
        self
    }

    /// Set the tolerance every axis reports.
    pub fn with_target_range(self, range: i64) -> Self {
        for axis in &mut self.lock().axes {
            axis.set_target_range(range);
        }
        self
    }

    /// Enable or disable end-of-travel flag reporting. When disabled, a
    /// stalled axis is only detectable from its position samples.
    pub fn with_eot_flags(self, enabled: bool) -> Self {
        self.lock().report_eot = enabled;
        self
    }

    /// Place `axis` at `position` (nm).
    pub fn with_position(self, axis: usize, position: i64) -> Self {
        if let Some(model) = self.lock().axes.get_mut(axis) {
            model.set_position(position);
        }
        self
    }

    /// Number of requests answered so far, over every connection.
    pub fn request_count(&self) -> u64 {
        self.lock().requests
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> u64 {
        self.lock().connections
    }

    /// Answer `command` with fault `code` until cleared.
    pub fn fail_on(&self, command: &str, code: i64) {
        self.lock().faults.insert(command.to_string(), code);
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Current position of `axis` in nm.
    pub fn position(&self, axis: usize) -> Option<i64> {
        let mut state = self.lock();
        state.advance();
        state.axes.get(axis).map(AxisModel::position)
    }

    /// Whether the output stage of `axis` is enabled.
    pub fn output_enabled(&self, axis: usize) -> bool {
        self.lock().axes.get(axis).is_some_and(AxisModel::output)
    }

    /// Whether closed-loop motion of `axis` is enabled.
    pub fn motion_enabled(&self, axis: usize) -> bool {
        self.lock().axes.get(axis).is_some_and(AxisModel::motion)
    }

    /// Connector speaking the Attocube AMC JSON-RPC dialect.
    pub fn amc_connector(&self) -> SimConnector<AmcDialect> {
        SimConnector::new(AmcDialect(self.clone()), Protocol::JsonRpc)
    }

    /// Connector speaking the PI GCS dialect.
    pub fn gcs_connector(&self) -> SimConnector<GcsDialect> {
        SimConnector::new(GcsDialect(self.clone()), Protocol::Gcs)
    }

    fn accept(&self) -> Result<(), HalError> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(HalError::HardwareFault(
                "simulated controller refused the connection".to_string(),
            ));
        }
        state.connections += 1;
        debug!("Simulated controller accepted connection #{}", state.connections);
        Ok(())
    }
}

/// Attocube AMC JSON-RPC dialect.
#[derive(Debug, Clone)]
pub struct AmcDialect(StageSimulator);

impl AmcDialect {
    fn result(state: &mut StageModel, method: &str, params: &[Value]) -> Option<Value> {
        if method == methods::ERROR_NUMBER_TO_STRING {
            let language = params.first().and_then(Value::as_i64);
            let code = params.get(1).and_then(Value::as_i64);
            return match (language, code) {
                (Some(_), Some(code)) => {
                    Some(json!([format!("Simulated controller error {code}")]))
                }
                _ => Some(json!([AMC_ERR_INVALID_PARAM])),
            };
        }
        if let Some(&code) = state.faults.get(method) {
            return Some(json!([code]));
        }

        let index = params.first().and_then(Value::as_u64).map(|a| a as usize);
        let flag = params.get(1).and_then(Value::as_bool).unwrap_or(false);
        let report_eot = state.report_eot;
        let Some(axis) = index.and_then(|i| state.axes.get_mut(i)) else {
            return Some(json!([AMC_ERR_INVALID_AXIS]));
        };

        let result = match method {
            methods::SET_OUTPUT => {
                axis.set_output(flag);
                json!([0])
            }
            methods::SET_TARGET_POSITION => {
                let target = params.get(1).and_then(Value::as_f64).unwrap_or_default();
                axis.set_target(target.round() as i64);
                json!([0])
            }
            methods::SET_MOVE => {
                axis.set_motion(flag);
                json!([0])
            }
            methods::GET_POSITION => json!([0, axis.position() as f64]),
            methods::GET_STATUS_MOVING => json!([0, i64::from(axis.is_moving())]),
            methods::GET_EOT_FORWARD => json!([0, report_eot && axis.at_forward_end()]),
            methods::GET_EOT_BACKWARD => json!([0, report_eot && axis.at_backward_end()]),
            methods::GET_TARGET_RANGE => json!([0, axis.target_range() as f64]),
            _ => return None,
        };
        Some(result)
    }
}

impl Dialect for AmcDialect {
    fn frame_len(&self, input: &[u8]) -> Option<usize> {
        let mut values = serde_json::Deserializer::from_slice(input).into_iter::<Value>();
        match values.next() {
            Some(Ok(_)) => Some(values.byte_offset()),
            _ => None,
        }
    }

    fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
        let request: Value = serde_json::from_slice(frame).unwrap_or_default();
        let method = request["method"].as_str().unwrap_or_default();
        let params = request["params"].as_array().cloned().unwrap_or_default();
        let id = request["id"].clone();

        let mut state = self.0.lock();
        state.requests += 1;
        state.advance();
        let reply = match Self::result(&mut state, method, &params) {
            Some(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
            None => json!({
                "jsonrpc": "2.0",
                "error": {"code": -32601, "message": format!("Method not found: {method}")},
                "id": id,
            }),
        };
        format!("{reply}\r\n").into_bytes()
    }

    fn accept(&self) -> Result<(), HalError> {
        self.0.accept()
    }
}

/// PI GCS dialect. Axis identifiers are `1..=n`.
#[derive(Debug, Clone)]
pub struct GcsDialect(StageSimulator);

impl GcsDialect {
    fn axis_index(state: &StageModel, id: &str) -> Option<usize> {
        id.parse::<usize>()
            .ok()
            .filter(|&n| n >= 1 && n <= state.axes.len())
            .map(|n| n - 1)
    }

    fn answer(lines: Vec<String>) -> Vec<u8> {
        let count = lines.len();
        let mut out = String::new();
        for (i, line) in lines.into_iter().enumerate() {
            out.push_str(&line);
            if i + 1 < count {
                out.push(' ');
            }
            out.push('\n');
        }
        out.into_bytes()
    }

    fn query(state: &mut StageModel, command: &str, args: &[&str]) -> Vec<String> {
        if command == "ERR?" {
            let code = std::mem::take(&mut state.gcs_error);
            return vec![code.to_string()];
        }
        if command == "SAI?" {
            return (1..=state.axes.len()).map(|n| n.to_string()).collect();
        }

        let ids: Vec<String> = if args.is_empty() {
            (1..=state.axes.len()).map(|n| n.to_string()).collect()
        } else {
            args.iter().map(|s| s.to_string()).collect()
        };
        let fault = state.faults.get(command).copied();
        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(axis) = Self::axis_index(state, &id).map(|i| &state.axes[i]) else {
                state.gcs_error = GCS_ERR_INVALID_AXIS;
                lines.push(format!("{id}=0"));
                continue;
            };
            let value = match (fault, command) {
                (Some(code), _) => format!("ERR{code}"),
                (None, "POS?") => format!("{:.4}", axis.position() as f64 / NM_PER_UM),
                (None, "ONT?") => u8::from(!axis.is_moving()).to_string(),
                (None, "SVO?") => u8::from(axis.output()).to_string(),
                (None, "TMN?") => format!("{:.4}", axis.limits().0 as f64 / NM_PER_UM),
                (None, "TMX?") => format!("{:.4}", axis.limits().1 as f64 / NM_PER_UM),
                (None, _) => {
                    state.gcs_error = GCS_ERR_UNKNOWN_COMMAND;
                    "0".to_string()
                }
            };
            lines.push(format!("{id}={value}"));
        }
        lines
    }

    fn command(state: &mut StageModel, command: &str, args: &[&str]) {
        if let Some(&code) = state.faults.get(command) {
            state.gcs_error = code;
            return;
        }
        for pair in args.chunks(2) {
            let (id, value) = match pair {
                [id, value] => (*id, Some(*value)),
                [id] => (*id, None),
                _ => continue,
            };
            let Some(index) = Self::axis_index(state, id) else {
                state.gcs_error = GCS_ERR_INVALID_AXIS;
                return;
            };
            let axis = &mut state.axes[index];
            match (command, value) {
                ("SVO", Some(v)) => axis.set_output(v == "1"),
                ("MOV", Some(v)) => {
                    let Ok(um) = v.parse::<f64>() else {
                        state.gcs_error = GCS_ERR_UNKNOWN_COMMAND;
                        return;
                    };
                    let target = (um * NM_PER_UM).round() as i64;
                    let (lo, hi) = axis.limits();
                    if !axis.output() {
                        state.gcs_error = GCS_ERR_SERVO_OFF;
                        return;
                    }
                    if target < lo || target > hi {
                        state.gcs_error = GCS_ERR_POS_OUT_OF_LIMITS;
                        return;
                    }
                    axis.set_target(target);
                    axis.set_motion(true);
                }
                ("HLT", _) => {
                    axis.set_motion(false);
                    let position = axis.position();
                    axis.set_target(position);
                    state.gcs_error = crate::transport::gcs::ERR_STOPPED_BY_COMMAND;
                }
                _ => {
                    state.gcs_error = GCS_ERR_UNKNOWN_COMMAND;
                    return;
                }
            }
        }
    }
}

impl Dialect for GcsDialect {
    fn frame_len(&self, input: &[u8]) -> Option<usize> {
        input.iter().position(|&b| b == b'\n').map(|i| i + 1)
    }

    fn respond(&mut self, frame: &[u8]) -> Vec<u8> {
        let line = String::from_utf8_lossy(frame);
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_string();
        let args: Vec<&str> = words.collect();

        let mut state = self.0.lock();
        state.requests += 1;
        state.advance();
        if command.ends_with('?') {
            Self::answer(Self::query(&mut state, &command, &args))
        } else {
            Self::command(&mut state, &command, &args);
            Vec::new()
        }
    }

    fn accept(&self) -> Result<(), HalError> {
        self.0.accept()
    }
}
