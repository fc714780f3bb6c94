//! Transport client contract.
//!
//! A transport sends one named command with positional arguments to a
//! controller and returns the structured result together with any fault
//! code the controller reported. Drivers are written against these traits
//! so that real sockets and the in-process simulator are interchangeable.

use crate::hal::config::ConnectionParams;
use crate::hal::driver::HalError;
use serde_json::Value;

/// Structured controller reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    /// Result values in controller order
    pub values: Vec<Value>,
    /// Controller fault code, `None` when the command succeeded
    pub fault: Option<i64>,
}

impl Reply {
    /// Successful reply carrying `values`.
    pub fn ok(values: Vec<Value>) -> Self {
        Self {
            values,
            fault: None,
        }
    }

    /// Failed reply carrying fault `code`.
    pub fn fault(code: i64) -> Self {
        Self {
            values: Vec::new(),
            fault: Some(code),
        }
    }

    /// Build a reply from a result array whose first element is an error
    /// code (zero or null on success).
    pub fn from_coded_result(values: Vec<Value>) -> Self {
        let fault = values.first().and_then(Value::as_i64).filter(|&code| code != 0);
        Self { values, fault }
    }

    /// Value at `index`.
    pub fn value(&self, index: usize) -> Result<&Value, HalError> {
        self.values
            .get(index)
            .ok_or_else(|| HalError::HardwareFault(format!("reply has no value at index {index}")))
    }

    /// Integer at `index`. Floats are rounded.
    pub fn i64_at(&self, index: usize) -> Result<i64, HalError> {
        let value = self.value(index)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| HalError::HardwareFault(format!("expected integer, got {value}")))
    }

    /// Float at `index`.
    pub fn f64_at(&self, index: usize) -> Result<f64, HalError> {
        let value = self.value(index)?;
        value
            .as_f64()
            .ok_or_else(|| HalError::HardwareFault(format!("expected number, got {value}")))
    }

    /// Boolean at `index`. Integers are read as `!= 0`.
    pub fn bool_at(&self, index: usize) -> Result<bool, HalError> {
        let value = self.value(index)?;
        value
            .as_bool()
            .or_else(|| value.as_i64().map(|i| i != 0))
            .ok_or_else(|| HalError::HardwareFault(format!("expected boolean, got {value}")))
    }

    /// String at `index`.
    pub fn str_at(&self, index: usize) -> Result<&str, HalError> {
        let value = self.value(index)?;
        value
            .as_str()
            .ok_or_else(|| HalError::HardwareFault(format!("expected string, got {value}")))
    }
}

/// Open connection to one controller.
pub trait Transport: Send {
    /// Send `command` with `args` and wait for the reply.
    ///
    /// Transport-level failures (socket errors, malformed replies) are
    /// returned as `HalError::HardwareFault`. Faults reported by the
    /// controller itself come back in `Reply::fault`.
    fn invoke(&mut self, command: &str, args: &[Value]) -> Result<Reply, HalError>;

    /// Close the connection. Must be safe to call repeatedly.
    fn close(&mut self) {}
}

/// Opens transports. Drivers own a connector so they can reconnect after
/// `close`.
pub trait Connector: Send {
    /// Open a transport described by `params`.
    fn connect(&mut self, params: &ConnectionParams) -> Result<Box<dyn Transport>, HalError>;
}
