//! PI General Command Set (GCS) client.
//!
//! Commands are single text lines `CMD arg arg\n`. Queries end in `?` and
//! answer one `key=value` line per item; every line but the last ends in a
//! space before the LF. After a plain command the client reads `ERR?` so
//! that controller faults surface in `Reply::fault`.

use super::line::LineStream;
use super::{format_arg, parse_field};
use pzt_common::hal::driver::HalError;
use pzt_common::hal::transport::{Reply, Transport};
use serde_json::Value;
use std::io::{Read, Write};
use tracing::trace;

/// GCS error code reported after a `HLT` command.
pub const ERR_STOPPED_BY_COMMAND: i64 = 10;

/// GCS client over any byte stream.
pub struct GcsClient<S: Read + Write> {
    stream: Option<LineStream<S>>,
}

impl<S: Read + Write> GcsClient<S> {
    /// Wrap an open stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(LineStream::new(stream)),
        }
    }

    fn send_line(stream: &mut LineStream<S>, command: &str, args: &[Value]) -> Result<(), HalError> {
        let mut line = command.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&format_arg(arg));
        }
        trace!("-> {line}");
        line.push('\n');
        stream.send(line.as_bytes())?;
        Ok(())
    }

    fn read_answer(stream: &mut LineStream<S>) -> Result<Vec<Value>, HalError> {
        let mut values = Vec::new();
        loop {
            let line = stream.read_until(b"\n")?;
            trace!("<- {line}");
            let more = line.ends_with(' ');
            let field = match line.split_once('=') {
                Some((_, value)) => value,
                None => line.as_str(),
            };
            values.push(parse_field(field));
            if !more {
                return Ok(values);
            }
        }
    }
}

impl<S: Read + Write + Send> Transport for GcsClient<S> {
    fn invoke(&mut self, command: &str, args: &[Value]) -> Result<Reply, HalError> {
        let stream = self.stream.as_mut().ok_or(HalError::NotConnected)?;
        Self::send_line(stream, command, args)?;
        if command.ends_with('?') {
            return Ok(Reply::ok(Self::read_answer(stream)?));
        }

        Self::send_line(stream, "ERR?", &[])?;
        let code = Reply::ok(Self::read_answer(stream)?).i64_at(0)?;
        if code == 0 {
            Ok(Reply::ok(Vec::new()))
        } else {
            Ok(Reply::fault(code))
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
