//! Length-prefixed framing: every message is sent as a 4-byte big-endian
//! length followed by that many bytes.
//!
//! Writes are buffered until [`Write::flush`], which emits the buffer as a
//! single frame. Reads pull one whole frame at a time and reject frames
//! larger than the configured maximum before allocating for them.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Read, Write};
use tracing::trace;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    #[error("Frame size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
    #[error("Negative frame size: {0}")]
    Negative(i32),
}

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub struct FramedTransport<T> {
    inner: T,
    max_frame_size: usize,
    read_buf: Vec<u8>,
    read_pos: usize,
    write_buf: Vec<u8>,
}

impl<T: Read + Write> FramedTransport<T> {
    pub fn new(inner: T) -> Self {
        FramedTransport {
            inner,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buf: Vec::new(),
            read_pos: 0,
            write_buf: Vec::new(),
        }
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Read the next whole frame. `Ok(None)` at a clean end of stream.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.inner.read(&mut header[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated frame header",
                )
                .into());
            }
            filled += n;
        }
        let size = i32::from_be_bytes(header);
        if size < 0 {
            return Err(FrameError::Negative(size));
        }
        let size = size as usize;
        if size > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        let mut frame = Vec::with_capacity(size.min(64 * 1024));
        let read = (&mut self.inner).take(size as u64).read_to_end(&mut frame)?;
        if read < size {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated frame").into());
        }
        trace!(size, "read frame");
        Ok(Some(frame))
    }

    /// Write `payload` as one frame and flush it.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let size = i32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
            size: payload.len(),
            max: i32::MAX as usize,
        })?;
        self.inner.write_i32::<BigEndian>(size)?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        trace!(size, "wrote frame");
        Ok(())
    }
}

impl<T: Read + Write> Read for FramedTransport<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_pos == self.read_buf.len() {
            match self.read_frame()? {
                Some(frame) => {
                    self.read_buf = frame;
                    self.read_pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = (&self.read_buf[self.read_pos..]).read(buf)?;
        self.read_pos += n;
        Ok(n)
    }
}

impl<T: Read + Write> Write for FramedTransport<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let payload = std::mem::take(&mut self.write_buf);
        self.write_frame(&payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BinaryProtocol, Protocol};
    use std::io::Cursor;

    #[test]
    fn flush_emits_one_frame() {
        let mut t = FramedTransport::new(Cursor::new(Vec::new()));
        t.write_all(b"ab").expect("write");
        t.write_all(b"c").expect("write");
        t.flush().expect("flush");
        assert_eq!(t.into_inner().into_inner(), vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn reads_across_frames() {
        let data = vec![0, 0, 0, 2, b'h', b'i', 0, 0, 0, 1, b'!'];
        let mut t = FramedTransport::new(Cursor::new(data));
        let mut out = String::new();
        t.read_to_string(&mut out).expect("read");
        assert_eq!(out, "hi!");
    }

    #[test]
    fn oversized_frame_rejected() {
        let data = vec![0x01, 0, 0, 0];
        let mut t = FramedTransport::new(Cursor::new(data)).with_max_frame_size(1024);
        assert!(matches!(
            t.read_frame(),
            Err(FrameError::TooLarge { size: 16777216, max: 1024 })
        ));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut t = FramedTransport::new(Cursor::new(vec![0, 0, 0, 9, 1]));
        assert!(matches!(t.read_frame(), Err(FrameError::Io(_))));
        let mut t = FramedTransport::new(Cursor::new(vec![0, 0]));
        assert!(matches!(t.read_frame(), Err(FrameError::Io(_))));
    }

    #[test]
    fn protocol_over_frames() {
        let mut p = BinaryProtocol::new(FramedTransport::new(Cursor::new(Vec::new())));
        p.write_string("hello").expect("write");
        p.flush().expect("flush");
        let bytes = p.into_inner().into_inner().into_inner();
        assert_eq!(&bytes[..4], &[0, 0, 0, 9]);

        let mut p = BinaryProtocol::new(FramedTransport::new(Cursor::new(bytes)));
        assert_eq!(p.read_string().expect("read"), "hello");
    }
}
