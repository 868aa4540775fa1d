//! Hand-off of the raw byte stream after a protocol switch.

use std::fmt;
use std::io::{self, Read, Write};

use bytes::{Buf, Bytes};

use crate::transport::Transport;

/// The byte stream of an upgraded connection.
///
/// Owns the transport together with the bytes the connection had already
/// read past the upgrade response (`read_buf`) and request bytes it had not
/// yet written (`write_buf`). The [`Read`] and [`Write`] impls consume those
/// first, so the stream continues exactly where the connection left off.
pub struct Upgraded<T> {
    transport: T,
    read_buf: Bytes,
    write_buf: Bytes,
}

impl<T: Transport> Upgraded<T> {
    pub(crate) fn new(transport: T, read_buf: Bytes, write_buf: Bytes) -> Self {
        Self {
            transport,
            read_buf,
            write_buf,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Bytes received after the upgrade response, not yet consumed.
    pub fn read_buf(&self) -> &[u8] {
        &self.read_buf
    }

    /// Bytes that still have to reach the peer before anything new.
    pub fn write_buf(&self) -> &[u8] {
        &self.write_buf
    }

    /// Split into the transport, the read-ahead and the unwritten bytes.
    pub fn into_parts(self) -> (T, Bytes, Bytes) {
        (self.transport, self.read_buf, self.write_buf)
    }

    /// Write out pending bytes. `WouldBlock` leaves the remainder buffered.
    pub fn flush_pending(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.transport.write(&self.write_buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<T: Transport> Read for Upgraded<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.read_buf.is_empty() {
            let n = buf.len().min(self.read_buf.len());
            buf[..n].copy_from_slice(&self.read_buf[..n]);
            self.read_buf.advance(n);
            return Ok(n);
        }
        self.transport.read(buf)
    }
}

impl<T: Transport> Write for Upgraded<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.flush_pending()?;
        self.transport.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending()?;
        self.transport.flush()
    }
}

impl<T> fmt::Debug for Upgraded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded")
            .field("read_buf", &self.read_buf.len())
            .field("write_buf", &self.write_buf.len())
            .finish()
    }
}
