//! Delimiter-framed reads over a byte stream.

use std::io::{self, BufRead, BufReader, Read, Write};

/// Byte stream with buffered, delimiter-framed reads.
pub struct LineStream<S: Read + Write> {
    inner: BufReader<S>,
}

impl<S: Read + Write> LineStream<S> {
    /// Wrap `stream`.
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Write all of `bytes` and flush.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(bytes)?;
        stream.flush()
    }

    /// Read up to and including `delimiter`; return the text before it.
    ///
    /// Fails with `UnexpectedEof` when the stream ends first.
    pub fn read_until(&mut self, delimiter: &[u8]) -> io::Result<String> {
        let mut frame = Vec::new();
        while !frame.ends_with(delimiter) {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed before delimiter",
                ));
            }
            // Bytes after the delimiter stay buffered for the next frame.
            frame.push(available[0]);
            self.inner.consume(1);
        }
        frame.truncate(frame.len() - delimiter.len());
        String::from_utf8(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_until_multibyte_delimiter() {
        let mut stream = LineStream::new(Cursor::new(b"abc\r\ndef\r\n".to_vec()));
        assert_eq!(stream.read_until(b"\r\n").unwrap(), "abc");
        assert_eq!(stream.read_until(b"\r\n").unwrap(), "def");
    }

    #[test]
    fn test_read_until_prompt() {
        let mut stream = LineStream::new(Cursor::new(b"ens?\r1\r> ".to_vec()));
        assert_eq!(stream.read_until(b"\r").unwrap(), "ens?");
        assert_eq!(stream.read_until(b"\r").unwrap(), "1");
        assert_eq!(stream.read_until(b"> ").unwrap(), "");
    }

    #[test]
    fn test_read_until_eof() {
        let mut stream = LineStream::new(Cursor::new(b"partial".to_vec()));
        let err = stream.read_until(b"\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
