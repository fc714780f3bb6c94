//! Thorlabs SC10 shutter controller client.
//!
//! Every command is echoed back by the controller and answered with the
//! prompt `> `. Writes are `key=value\r` (or a bare `key\r` for toggles);
//! queries are `key?\r` followed by a value line before the prompt.

use super::line::LineStream;
use super::{format_arg, parse_field};
use pzt_common::hal::driver::HalError;
use pzt_common::hal::transport::{Reply, Transport};
use serde_json::Value;
use std::io::{Read, Write};
use tracing::trace;

/// Command terminator.
pub const TERMINATOR: &[u8] = b"\r";

/// Prompt that ends every answer.
pub const PROMPT: &[u8] = b"> ";

/// Fault code for an unknown command.
pub const FAULT_NOT_DEFINED: i64 = 1;

/// Fault code for an argument outside the accepted range.
pub const FAULT_ARG_INVALID: i64 = 2;

fn fault_code(text: &str) -> Option<i64> {
    if text.contains("CMD_NOT_DEFINED") {
        Some(FAULT_NOT_DEFINED)
    } else if text.contains("CMD_ARG_INVALID") {
        Some(FAULT_ARG_INVALID)
    } else {
        None
    }
}

/// SC10 client over any byte stream.
pub struct Sc10Client<S: Read + Write> {
    stream: Option<LineStream<S>>,
}

impl<S: Read + Write> Sc10Client<S> {
    /// Wrap an open stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(LineStream::new(stream)),
        }
    }

    fn write(stream: &mut LineStream<S>, line: &str) -> Result<Reply, HalError> {
        trace!("-> {line}");
        stream.send(line.as_bytes())?;
        stream.send(TERMINATOR)?;
        let answer = stream.read_until(PROMPT)?;
        trace!("<- {answer:?}");
        Ok(match fault_code(&answer) {
            Some(code) => Reply::fault(code),
            None => Reply::ok(Vec::new()),
        })
    }

    fn query(stream: &mut LineStream<S>, line: &str) -> Result<Reply, HalError> {
        trace!("-> {line}");
        stream.send(line.as_bytes())?;
        stream.send(TERMINATOR)?;

        let echo = stream.read_until(TERMINATOR)?;
        if echo.trim_start_matches(['>', ' ']) != line {
            let rest = stream.read_until(PROMPT)?;
            return match fault_code(&echo).or_else(|| fault_code(&rest)) {
                Some(code) => Ok(Reply::fault(code)),
                None => Err(HalError::HardwareFault(format!(
                    "unexpected echo {echo:?} for {line:?}"
                ))),
            };
        }

        let value = stream.read_until(TERMINATOR)?;
        stream.read_until(PROMPT)?;
        trace!("<- {value}");
        Ok(match fault_code(&value) {
            Some(code) => Reply::fault(code),
            None => Reply::ok(vec![parse_field(&value)]),
        })
    }
}

impl<S: Read + Write + Send> Transport for Sc10Client<S> {
    /// `command` ending in `?` is a query; otherwise the first argument, if
    /// any, is sent as `command=value`.
    fn invoke(&mut self, command: &str, args: &[Value]) -> Result<Reply, HalError> {
        let stream = self.stream.as_mut().ok_or(HalError::NotConnected)?;
        if command.ends_with('?') {
            return Self::query(stream, command);
        }
        match args.first() {
            Some(value) => Self::write(stream, &format!("{command}={}", format_arg(value))),
            None => Self::write(stream, command),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}
