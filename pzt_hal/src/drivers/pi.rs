//! PI (Physik Instrumente) GCS driver.
//!
//! GCS works in µm with floating-point values; the driver converts to
//! integer nm. `MOV` both sets the target and starts motion, so the target
//! is held back until motion is enabled. Travel limits come from
//! `TMN?`/`TMX?`; on-target state from `ONT?`.

use crate::transport::gcs::ERR_STOPPED_BY_COMMAND;
use pzt_common::hal::config::ConnectionParams;
use pzt_common::hal::driver::{ActuatorDriver, HalError};
use pzt_common::hal::transport::{Connector, Reply, Transport};
use pzt_common::hal::types::AxisRange;
use serde_json::{Value, json};
use tracing::debug;

const NM_PER_UM: f64 = 1000.0;

fn to_nm(um: f64) -> i64 {
    (um * NM_PER_UM).round() as i64
}

fn to_um(nm: i64) -> f64 {
    nm as f64 / NM_PER_UM
}

/// PI GCS driver over any GCS connector.
pub struct PiDriver {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    /// Controller axis identifiers, indexed by zero-based axis
    axis_ids: Vec<String>,
    /// Targets waiting for `set_motion(true)`
    pending: Vec<Option<i64>>,
}

impl PiDriver {
    /// Driver opening its transport through `connector`.
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            transport: None,
            axis_ids: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn axis_id(&self, axis: usize) -> Result<Value, HalError> {
        self.axis_ids
            .get(axis)
            .map(|id| json!(id))
            .ok_or_else(|| HalError::InvalidArgument(format!("no axis {axis} on PI controller")))
    }

    fn invoke(&mut self, command: &str, args: &[Value]) -> Result<Reply, HalError> {
        self.transport
            .as_mut()
            .ok_or(HalError::NotConnected)?
            .invoke(command, args)
    }

    fn command(&mut self, command: &str, args: &[Value]) -> Result<(), HalError> {
        match self.invoke(command, args)?.fault {
            None => Ok(()),
            Some(code) => Err(HalError::HardwareFault(format!(
                "GCS {command} failed with error {code}"
            ))),
        }
    }

    fn query_axis(&mut self, command: &str, axis: usize) -> Result<Reply, HalError> {
        let id = self.axis_id(axis)?;
        self.invoke(command, &[id])
    }
}

impl ActuatorDriver for PiDriver {
    fn family(&self) -> &'static str {
        "pi"
    }

    fn open(&mut self, params: &ConnectionParams) -> Result<(), HalError> {
        self.close();
        self.transport = Some(self.connector.connect(params)?);
        Ok(())
    }

    fn axis_count(&mut self, params: &ConnectionParams) -> Result<usize, HalError> {
        let reply = self.invoke("SAI?", &[])?;
        let mut ids: Vec<String> = reply
            .values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        if let Some(wanted) = params.num_axes {
            if wanted > ids.len() {
                return Err(HalError::AxisCountMismatch {
                    expected: ids.len(),
                    actual: wanted,
                });
            }
            ids.truncate(wanted);
        }
        debug!("PI controller axes: {ids:?}");
        self.pending = vec![None; ids.len()];
        self.axis_ids = ids;
        Ok(self.axis_ids.len())
    }

    fn travel_range(&mut self, axis: usize) -> Result<AxisRange, HalError> {
        let min = self.query_axis("TMN?", axis)?.f64_at(0)?;
        let max = self.query_axis("TMX?", axis)?.f64_at(0)?;
        Ok(AxisRange::new(to_nm(min), to_nm(max)))
    }

    fn set_output(&mut self, axis: usize, enabled: bool) -> Result<(), HalError> {
        let id = self.axis_id(axis)?;
        self.command("SVO", &[id, json!(enabled)])
    }

    fn set_target(&mut self, axis: usize, target: i64) -> Result<(), HalError> {
        self.axis_id(axis)?;
        self.pending[axis] = Some(target);
        Ok(())
    }

    fn set_motion(&mut self, axis: usize, enabled: bool) -> Result<(), HalError> {
        let id = self.axis_id(axis)?;
        if enabled {
            let Some(target) = self.pending[axis].take() else {
                return Ok(());
            };
            return self.command("MOV", &[id, json!(to_um(target))]);
        }

        let reply = self.invoke("HLT", &[id])?;
        match reply.fault {
            None | Some(ERR_STOPPED_BY_COMMAND) => Ok(()),
            Some(code) => Err(HalError::HardwareFault(format!(
                "GCS HLT failed with error {code}"
            ))),
        }
    }

    fn position(&mut self, axis: usize) -> Result<i64, HalError> {
        Ok(to_nm(self.query_axis("POS?", axis)?.f64_at(0)?))
    }

    fn is_moving(&mut self, axis: usize) -> Result<bool, HalError> {
        Ok(!self.query_axis("ONT?", axis)?.bool_at(0)?)
    }

    fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            debug!("GCS transport closed");
        }
        self.pending.iter_mut().for_each(|p| *p = None);
    }
}
