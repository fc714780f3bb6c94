//! In-memory byte stream answering like a real controller.
//!
//! Bytes written to a [`SimStream`] are split into request frames by its
//! [`Dialect`]; every complete frame is answered immediately and the reply
//! bytes are queued for reading. The production transport clients run on
//! top of it unchanged.

use crate::transport::Protocol;
use pzt_common::hal::config::ConnectionParams;
use pzt_common::hal::driver::HalError;
use pzt_common::hal::transport::{Connector, Transport};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Request framing and answering for one wire protocol.
pub trait Dialect: Send + 'static {
    /// Length of the first complete request frame in `input`, if any.
    fn frame_len(&self, input: &[u8]) -> Option<usize>;

    /// Answer one request frame.
    fn respond(&mut self, frame: &[u8]) -> Vec<u8>;

    /// Whether a new connection is accepted.
    fn accept(&self) -> Result<(), HalError> {
        Ok(())
    }
}

/// Simulated controller connection.
pub struct SimStream<D: Dialect> {
    dialect: D,
    input: Vec<u8>,
    output: VecDeque<u8>,
}

impl<D: Dialect> SimStream<D> {
    /// Stream answering with `dialect`.
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            input: Vec::new(),
            output: VecDeque::new(),
        }
    }
}

impl<D: Dialect> Write for SimStream<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.input.extend_from_slice(buf);
        while let Some(len) = self.dialect.frame_len(&self.input) {
            let frame: Vec<u8> = self.input.drain(..len).collect();
            let reply = self.dialect.respond(&frame);
            self.output.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: Dialect> Read for SimStream<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated controller has no reply pending",
            ));
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Opens [`SimStream`] transports.
#[derive(Clone)]
pub struct SimConnector<D: Dialect + Clone> {
    dialect: D,
    protocol: Protocol,
}

impl<D: Dialect + Clone> SimConnector<D> {
    /// Connector wrapping copies of `dialect` in the `protocol` client.
    pub fn new(dialect: D, protocol: Protocol) -> Self {
        Self { dialect, protocol }
    }
}

impl<D: Dialect + Clone> Connector for SimConnector<D> {
    fn connect(&mut self, _params: &ConnectionParams) -> Result<Box<dyn Transport>, HalError> {
        self.dialect.accept()?;
        Ok(self.protocol.client(SimStream::new(self.dialect.clone())))
    }
}
