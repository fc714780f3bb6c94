//! Transport clients.
//!
//! Each client wraps a byte stream and implements
//! `pzt_common::hal::transport::Transport`:
//!
//! - [`json_rpc`] - Attocube AMC JSON-RPC, CRLF-terminated replies
//! - [`gcs`] - PI GCS text commands, `axis=value` query replies
//! - [`sc10`] - Thorlabs SC10 `key=value` commands with echo and prompt
//!
//! [`TcpConnector`] opens any of them over TCP; [`SerialConnector`]
//! (feature `serial`) opens the SC10 client over a local serial port.

pub mod gcs;
pub mod json_rpc;
pub mod line;
pub mod sc10;

use pzt_common::hal::config::ConnectionParams;
use pzt_common::hal::consts::SC10_BRIDGE_DEFAULT_PORT;
use pzt_common::hal::driver::HalError;
use pzt_common::hal::transport::{Connector, Transport};
use serde_json::Value;
use std::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

pub use gcs::GcsClient;
pub use json_rpc::JsonRpcClient;
pub use line::LineStream;
pub use sc10::Sc10Client;

/// Wire protocol spoken over a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Attocube AMC JSON-RPC
    JsonRpc,
    /// PI General Command Set
    Gcs,
    /// Thorlabs SC10 line protocol
    Sc10,
}

impl Protocol {
    /// Wrap `stream` in the client for this protocol.
    pub fn client<S>(self, stream: S) -> Box<dyn Transport>
    where
        S: std::io::Read + std::io::Write + Send + 'static,
    {
        match self {
            Self::JsonRpc => Box::new(JsonRpcClient::new(stream)),
            Self::Gcs => Box::new(GcsClient::new(stream)),
            Self::Sc10 => Box::new(Sc10Client::new(stream)),
        }
    }
}

/// Opens transports over TCP.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    protocol: Protocol,
    default_port: u16,
}

impl TcpConnector {
    /// Connector for `protocol`, appending `default_port` to addresses
    /// without one.
    pub fn new(protocol: Protocol, default_port: u16) -> Self {
        Self {
            protocol,
            default_port,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, params: &ConnectionParams) -> Result<Box<dyn Transport>, HalError> {
        let address = params
            .address
            .as_deref()
            .ok_or_else(|| HalError::ConfigError("connection address is required".to_string()))?;
        let address = if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{}", self.default_port)
        };

        let timeout = params.io_timeout();
        let socket = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| HalError::ConfigError(format!("cannot resolve '{address}'")))?;
        let stream = TcpStream::connect_timeout(&socket, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        debug!("Connected to {address} ({:?})", self.protocol);

        Ok(self.protocol.client(stream))
    }
}

/// Opens the SC10 client over a serial port when the address is a device
/// path, otherwise over a TCP serial bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sc10Connector;

impl Sc10Connector {
    fn is_serial_path(address: &str) -> bool {
        address.starts_with("/dev/") || address.to_ascii_uppercase().starts_with("COM")
    }
}

impl Connector for Sc10Connector {
    fn connect(&mut self, params: &ConnectionParams) -> Result<Box<dyn Transport>, HalError> {
        let serial = params.address.as_deref().is_some_and(Self::is_serial_path);
        if !serial {
            return TcpConnector::new(Protocol::Sc10, SC10_BRIDGE_DEFAULT_PORT).connect(params);
        }
        #[cfg(feature = "serial")]
        {
            SerialConnector.connect(params)
        }
        #[cfg(not(feature = "serial"))]
        {
            Err(HalError::ConfigError(
                "serial ports require the `serial` feature".to_string(),
            ))
        }
    }
}

/// Opens the SC10 client over a local serial port.
#[cfg(feature = "serial")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[cfg(feature = "serial")]
impl Connector for SerialConnector {
    fn connect(&mut self, params: &ConnectionParams) -> Result<Box<dyn Transport>, HalError> {
        use pzt_common::hal::consts::SC10_DEFAULT_BAUD;

        let path = params
            .address
            .as_deref()
            .ok_or_else(|| HalError::ConfigError("serial port path is required".to_string()))?;
        let port = serialport::new(path, params.baud_rate.unwrap_or(SC10_DEFAULT_BAUD))
            .timeout(params.io_timeout())
            .open()
            .map_err(|e| HalError::HardwareFault(format!("{path}: {e}")))?;
        debug!("Opened serial port {path}");

        Ok(Protocol::Sc10.client(port))
    }
}

/// Render a positional argument the way text protocols expect it:
/// strings unquoted, booleans as `1`/`0`.
pub(crate) fn format_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => u8::from(*b).to_string(),
        other => other.to_string(),
    }
}

/// Parse a text reply field into a JSON value: integers, then floats,
/// otherwise the trimmed string.
pub(crate) fn parse_field(text: &str) -> Value {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(text.to_string())
}
