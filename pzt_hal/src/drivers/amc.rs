//! Attocube AMC driver.
//!
//! Positions are nm as reported by the controller. The AMC exposes no
//! travel limits, so every axis starts with an unknown range that the
//! motion controller narrows as end-of-travel stalls are observed.

use pzt_common::hal::config::ConnectionParams;
use pzt_common::hal::driver::{ActuatorDriver, EotFlags, HalError};
use pzt_common::hal::transport::{Connector, Reply, Transport};
use pzt_common::hal::types::AxisRange;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// JSON-RPC method names.
pub mod methods {
    /// `[axis, enabled]` - output stage on/off
    pub const SET_OUTPUT: &str = "com.attocube.amc.control.setControlOutput";
    /// `[axis, target]` - closed-loop target in nm
    pub const SET_TARGET_POSITION: &str = "com.attocube.amc.move.setControlTargetPosition";
    /// `[axis, enabled]` - closed-loop motion on/off
    pub const SET_MOVE: &str = "com.attocube.amc.control.setControlMove";
    /// `[axis] -> [code, position]`
    pub const GET_POSITION: &str = "com.attocube.amc.move.getPosition";
    /// `[axis] -> [code, 0 idle | 1 moving | 2 pending]`
    pub const GET_STATUS_MOVING: &str = "com.attocube.amc.status.getStatusMoving";
    /// `[axis] -> [code, bool]`
    pub const GET_EOT_FORWARD: &str = "com.attocube.amc.status.getStatusEotFwd";
    /// `[axis] -> [code, bool]`
    pub const GET_EOT_BACKWARD: &str = "com.attocube.amc.status.getStatusEotBkwd";
    /// `[axis] -> [code, range]`
    pub const GET_TARGET_RANGE: &str = "com.attocube.amc.control.getControlTargetRange";
    /// `[language: int, code: int] -> [text]`
    pub const ERROR_NUMBER_TO_STRING: &str = "com.attocube.system.errorNumberToString";
}

/// Language code passed to `errorNumberToString` (0 = English).
pub const ERROR_LANGUAGE: i64 = 0;

/// Axes of an AMC100 when `num_axes` is not configured.
pub const AMC_AXES: usize = 3;

/// Attocube AMC driver over any JSON-RPC connector.
pub struct AmcDriver {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
}

impl AmcDriver {
    /// Driver opening its transport through `connector`.
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            transport: None,
        }
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, HalError> {
        self.transport.as_mut().ok_or(HalError::NotConnected)
    }

    fn call(&mut self, method: &str, params: &[Value]) -> Result<Reply, HalError> {
        let reply = self.transport()?.invoke(method, params)?;
        match reply.fault {
            None => Ok(reply),
            Some(code) => {
                let text = self.describe(code);
                Err(HalError::HardwareFault(format!("{method}: {text} ({code})")))
            }
        }
    }

    /// Controller text for error `code`; falls back to the bare number.
    fn describe(&mut self, code: i64) -> String {
        let params = [json!(ERROR_LANGUAGE), json!(code)];
        let lookup = self
            .transport()
            .and_then(|t| t.invoke(methods::ERROR_NUMBER_TO_STRING, &params));
        match lookup.as_ref().map(|reply| (reply.fault, reply.str_at(0))) {
            Ok((None, Ok(text))) => text.to_string(),
            _ => {
                debug!("No description for AMC error {code}");
                format!("error {code}")
            }
        }
    }
}

impl ActuatorDriver for AmcDriver {
    fn family(&self) -> &'static str {
        "attocube"
    }

    fn open(&mut self, params: &ConnectionParams) -> Result<(), HalError> {
        self.close();
        self.transport = Some(self.connector.connect(params)?);
        Ok(())
    }

    fn axis_count(&mut self, params: &ConnectionParams) -> Result<usize, HalError> {
        Ok(params.num_axes.unwrap_or(AMC_AXES))
    }

    fn travel_range(&mut self, _axis: usize) -> Result<AxisRange, HalError> {
        Ok(AxisRange::unknown())
    }

    fn target_range(&mut self, axis: usize) -> Result<Option<i64>, HalError> {
        let reply = self.call(methods::GET_TARGET_RANGE, &[json!(axis)])?;
        Ok(Some(reply.i64_at(1)?.abs()))
    }

    fn set_output(&mut self, axis: usize, enabled: bool) -> Result<(), HalError> {
        self.call(methods::SET_OUTPUT, &[json!(axis), json!(enabled)])?;
        Ok(())
    }

    fn set_target(&mut self, axis: usize, target: i64) -> Result<(), HalError> {
        self.call(methods::SET_TARGET_POSITION, &[json!(axis), json!(target as f64)])?;
        Ok(())
    }

    fn set_motion(&mut self, axis: usize, enabled: bool) -> Result<(), HalError> {
        self.call(methods::SET_MOVE, &[json!(axis), json!(enabled)])?;
        Ok(())
    }

    fn position(&mut self, axis: usize) -> Result<i64, HalError> {
        self.call(methods::GET_POSITION, &[json!(axis)])?.i64_at(1)
    }

    fn is_moving(&mut self, axis: usize) -> Result<bool, HalError> {
        let status = self.call(methods::GET_STATUS_MOVING, &[json!(axis)])?.i64_at(1)?;
        Ok(status != 0)
    }

    fn eot_flags(&mut self, axis: usize) -> Result<EotFlags, HalError> {
        let mut flags = EotFlags::empty();
        if self.call(methods::GET_EOT_FORWARD, &[json!(axis)])?.bool_at(1)? {
            flags |= EotFlags::FORWARD;
        }
        if self.call(methods::GET_EOT_BACKWARD, &[json!(axis)])?.bool_at(1)? {
            flags |= EotFlags::BACKWARD;
        }
        Ok(flags)
    }

    fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            debug!("AMC transport closed");
        }
    }
}

impl Drop for AmcDriver {
    fn drop(&mut self) {
        if self.transport.is_some() {
            warn!("AMC driver dropped while connected");
            self.close();
        }
    }
}
