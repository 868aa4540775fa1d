//! The byte-stream seam.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::option::{OptionType, OptionValue, options};

/// An established, non-blocking, bidirectional byte stream.
///
/// The connection drives the transport from its event-loop entry points.
/// `read` and `write` must not block: when no progress is possible they
/// return [`io::ErrorKind::WouldBlock`] and the event loop calls back later.
/// `read` returning `Ok(0)` means the peer closed its side.
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Release the stream. Called at most once, when the connection closes.
    fn close(&mut self) -> io::Result<()>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// True if the transport implements the named option.
    fn supports_option(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    fn get_option(&self, name: &str) -> io::Result<Option<OptionValue>> {
        let _ = name;
        Ok(None)
    }

    /// Apply an option whose type the connection already checked.
    /// Returns the previous value.
    fn set_option(&mut self, name: &str, value: OptionValue) -> io::Result<Option<OptionValue>> {
        let _ = value;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("option {name} not supported by transport"),
        ))
    }
}

/// Plain TCP. The caller must put the stream in non-blocking mode.
impl Transport for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // The peer may already have reset the stream.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn supports_option(&self, name: &str) -> bool {
        [
            options::TCP_NODELAY.name(),
            options::READ_TIMEOUT.name(),
            options::WRITE_TIMEOUT.name(),
        ]
        .contains(&name)
    }

    fn get_option(&self, name: &str) -> io::Result<Option<OptionValue>> {
        match name {
            n if n == options::TCP_NODELAY.name() => Ok(Some(self.nodelay()?.into_value())),
            n if n == options::READ_TIMEOUT.name() => {
                Ok(self.read_timeout()?.map(OptionType::into_value))
            }
            n if n == options::WRITE_TIMEOUT.name() => {
                Ok(self.write_timeout()?.map(OptionType::into_value))
            }
            _ => Ok(None),
        }
    }

    fn set_option(&mut self, name: &str, value: OptionValue) -> io::Result<Option<OptionValue>> {
        let previous = Transport::get_option(self, name)?;
        match (name, value) {
            (n, OptionValue::Bool(on)) if n == options::TCP_NODELAY.name() => self.set_nodelay(on)?,
            (n, OptionValue::Duration(d)) if n == options::READ_TIMEOUT.name() => {
                self.set_read_timeout(Some(d))?
            }
            (n, OptionValue::Duration(d)) if n == options::WRITE_TIMEOUT.name() => {
                self.set_write_timeout(Some(d))?
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("option {name} not supported by TcpStream"),
                ));
            }
        }
        Ok(previous)
    }
}
