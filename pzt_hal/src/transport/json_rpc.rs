//! JSON-RPC 2.0 client for Attocube AMC controllers.
//!
//! Requests are written as bare JSON objects; replies arrive one per line,
//! terminated by CRLF. The `result` array carries an error code in its
//! first element and the payload after it.

use super::line::LineStream;
use pzt_common::hal::driver::HalError;
use pzt_common::hal::transport::{Reply, Transport};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::{Read, Write};
use tracing::trace;

/// Reply frame terminator.
pub const REPLY_TERMINATOR: &[u8] = b"\r\n";

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// JSON-RPC client over any byte stream.
pub struct JsonRpcClient<S: Read + Write> {
    stream: Option<LineStream<S>>,
    next_id: u64,
}

impl<S: Read + Write> JsonRpcClient<S> {
    /// Wrap an open stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(LineStream::new(stream)),
            next_id: 1,
        }
    }

    fn call(&mut self, method: &str, params: &[Value]) -> Result<Value, HalError> {
        let stream = self.stream.as_mut().ok_or(HalError::NotConnected)?;
        let id = self.next_id;
        self.next_id += 1;

        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        trace!("-> {request}");
        stream.send(request.to_string().as_bytes())?;

        let line = stream.read_until(REPLY_TERMINATOR)?;
        trace!("<- {line}");
        let response: RpcResponse = serde_json::from_str(&line)
            .map_err(|e| HalError::HardwareFault(format!("malformed reply to {method}: {e}")))?;

        if let Some(error) = response.error {
            return Err(HalError::HardwareFault(format!(
                "{method}: {} ({})",
                error.message, error.code
            )));
        }
        if response.id.is_some_and(|reply_id| reply_id != id) {
            return Err(HalError::HardwareFault(format!(
                "{method}: reply id {:?} does not match request id {id}",
                response.id
            )));
        }
        response
            .result
            .ok_or_else(|| HalError::HardwareFault(format!("{method}: reply without result")))
    }
}

impl<S: Read + Write + Send> Transport for JsonRpcClient<S> {
    fn invoke(&mut self, command: &str, args: &[Value]) -> Result<Reply, HalError> {
        match self.call(command, args)? {
            Value::Array(values) => Ok(Reply::from_coded_result(values)),
            other => Ok(Reply::ok(vec![other])),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// Canned reply stream that records what was written.
    struct Canned {
        reply: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for Canned {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client(reply: &str) -> JsonRpcClient<Canned> {
        JsonRpcClient::new(Canned {
            reply: Cursor::new(reply.as_bytes().to_vec()),
            written: Vec::new(),
        })
    }

    #[test]
    fn test_invoke_coded_result() {
        let mut client = client("{\"jsonrpc\":\"2.0\",\"result\":[0,1500],\"id\":1}\r\n");
        let reply = client
            .invoke("com.attocube.amc.move.getPosition", &[json!(0)])
            .unwrap();
        assert_eq!(reply.fault, None);
        assert_eq!(reply.i64_at(1).unwrap(), 1500);

        let stream = client.stream.as_mut().unwrap().get_mut();
        let sent: Value = serde_json::from_slice(&stream.written).unwrap();
        assert_eq!(sent["method"], "com.attocube.amc.move.getPosition");
        assert_eq!(sent["params"], json!([0]));
    }

    #[test]
    fn test_invoke_reports_controller_fault() {
        let mut client = client("{\"jsonrpc\":\"2.0\",\"result\":[5],\"id\":1}\r\n");
        let reply = client.invoke("m", &[]).unwrap();
        assert_eq!(reply.fault, Some(5));
    }

    #[test]
    fn test_rpc_error_is_hardware_fault() {
        let mut client = client(
            "{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32601,\"message\":\"Method not found\"},\"id\":1}\r\n",
        );
        let err = client.invoke("bogus", &[]).unwrap_err();
        assert!(matches!(err, HalError::HardwareFault(msg) if msg.contains("Method not found")));
    }

    #[test]
    fn test_mismatched_id() {
        let mut client = client("{\"jsonrpc\":\"2.0\",\"result\":[0],\"id\":7}\r\n");
        assert!(client.invoke("m", &[]).is_err());
    }

    #[test]
    fn test_closed_client() {
        let mut client = client("");
        client.close();
        assert_eq!(client.invoke("m", &[]).unwrap_err(), HalError::NotConnected);
    }
}
