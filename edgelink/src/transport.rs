//! Raw byte transports carrying the multiplexed frame stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// A bidirectional byte connection to the remote endpoint.
///
/// All methods take `&self`: the channel manager reads from one thread
/// while any number of channels write, and [`close`](Self::close) must
/// unblock a pending [`read`](Self::read).
pub trait Transport: Send + Sync {
    /// Establishes the connection.
    fn open(&self) -> io::Result<()>;

    /// Tears the connection down. Closing a closed transport is a no-op.
    fn close(&self) -> io::Result<()>;

    /// Returns `true` while the connection is established.
    fn is_opened(&self) -> bool;

    /// Fills `buf` completely or fails. End of stream is reported as
    /// [`io::ErrorKind::ConnectionReset`].
    fn read(&self, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `buf`.
    fn write(&self, buf: &[u8]) -> io::Result<()>;
}

/// Shared slot holding the current stream of a transport.
///
/// Readers and writers clone the handle out of the lock so a blocked read
/// never holds it; `close` takes the handle and shuts it down underneath.
#[derive(Debug)]
pub(crate) struct StreamSlot<S> {
    stream: Mutex<Option<Arc<S>>>,
}

impl<S> StreamSlot<S> {
    pub(crate) const fn new() -> Self {
        Self {
            stream: Mutex::new(None),
        }
    }

    pub(crate) fn set(&self, stream: S) {
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(stream));
    }

    pub(crate) fn take(&self) -> Option<Arc<S>> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn get(&self) -> io::Result<Arc<S>> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl<S> StreamSlot<S>
where
    for<'a> &'a S: Read + Write,
{
    pub(crate) fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        let stream = self.get()?;
        (&*stream).read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::from(io::ErrorKind::ConnectionReset)
            } else {
                e
            }
        })
    }

    pub(crate) fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let stream = self.get()?;
        let mut w = &*stream;
        w.write_all(buf)?;
        w.flush()
    }
}

/// TCP client transport.
#[derive(Debug)]
pub struct SocketTransport {
    addr: String,
    slot: StreamSlot<TcpStream>,
}

impl SocketTransport {
    /// Creates a transport connecting to `addr` (`host:port`) on open.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            slot: StreamSlot::new(),
        }
    }
}

impl Transport for SocketTransport {
    fn open(&self) -> io::Result<()> {
        let mut last = io::Error::from(io::ErrorKind::AddrNotAvailable);
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%addr, "socket transport connected");
                    self.slot.set(stream);
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    fn close(&self) -> io::Result<()> {
        if let Some(stream) = self.slot.take() {
            match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => debug!(addr = %self.addr, "socket transport closed"),
            }
        }
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.slot.is_set()
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<()> {
        self.slot.read_exact(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<()> {
        self.slot.write_all(buf)
    }
}
