//! Per-port logical byte streams.
//!
//! A [`PortChannel`] never buffers: the manager's reader thread hands
//! payload to a blocked [`Channel::read`] through a single-slot mailbox.
//! The consumer arms the slot with the number of bytes it still needs
//! ([`PortChannel::wait_read`] on the manager side returns that number),
//! and the manager answers with one owned chunk ([`PortChannel::read_done`])
//! that the consumer copies straight into its buffer.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use edgelink_proto::MAX_FRAME_DATA;
use tracing::debug;

use crate::error::{Error, Result};
use crate::manager::Link;

/// A connected, ordered, bidirectional byte stream.
///
/// Implemented by [`PortChannel`] and by decorators such as
/// [`TlsChannel`](crate::TlsChannel).
pub trait Channel: Send + Sync {
    /// Blocks until the underlying link is up.
    ///
    /// Fails with [`Error::Shutdown`] when the manager stops and with
    /// [`Error::ConnectionReset`] when [`close`](Self::close) is called
    /// concurrently.
    fn connect(&self) -> Result<()>;

    /// Closes the channel and wakes every blocked reader and connector.
    fn close(&self);

    /// Returns `true` while the underlying link is up.
    fn is_connected(&self) -> bool;

    /// Fills `buf` completely. Returns [`Error::ConnectionReset`] once the
    /// channel is closed.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Sends all of `buf`, returning its length.
    fn write(&self, buf: &[u8]) -> Result<usize>;
}

#[derive(Debug, Default)]
struct Slot {
    /// Bytes the blocked reader still needs; `None` when no read is armed.
    requested: Option<usize>,
    /// Chunk handed over by the manager, not yet consumed.
    delivered: Option<Bytes>,
    closed: bool,
    /// Bumped on every close so a pending connect notices it.
    close_gen: u64,
}

/// Channel bound to one port of a [`ChannelManager`](crate::ChannelManager).
pub struct PortChannel {
    port: u32,
    link: Arc<Link>,
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl std::fmt::Debug for PortChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortChannel")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl PortChannel {
    pub(crate) fn new(port: u32, link: Arc<Link>) -> Self {
        Self {
            port,
            link,
            slot: Mutex::new(Slot::default()),
            cond: Condvar::new(),
        }
    }

    /// Port this channel is bound to.
    pub const fn port(&self) -> u32 {
        self.port
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes waiters so they re-check link state.
    pub(crate) fn notify(&self) {
        let _slot = self.lock();
        self.cond.notify_all();
    }

    /// Waits until a reader is armed and the previous chunk was consumed.
    ///
    /// Returns the number of bytes the reader still needs.
    pub(crate) fn wait_read(&self, timeout: Duration) -> Result<usize> {
        let slot = self.lock();
        let (slot, _) = self
            .cond
            .wait_timeout_while(slot, timeout, |s| {
                !s.closed && (s.requested.is_none() || s.delivered.is_some())
            })
            .unwrap_or_else(PoisonError::into_inner);

        if slot.closed {
            return Err(Error::ConnectionReset);
        }
        match (slot.requested, &slot.delivered) {
            (Some(n), None) => Ok(n),
            _ => Err(Error::Timeout),
        }
    }

    /// Hands `chunk` to the armed reader. `chunk` never exceeds the size
    /// returned by the preceding [`wait_read`](Self::wait_read).
    pub(crate) fn read_done(&self, chunk: Bytes) {
        let mut slot = self.lock();
        slot.requested = None;
        slot.delivered = Some(chunk);
        self.cond.notify_all();
    }
}

impl Channel for PortChannel {
    fn connect(&self) -> Result<()> {
        let mut slot = self.lock();
        slot.closed = false;
        let generation = slot.close_gen;

        let slot = self
            .cond
            .wait_while(slot, |s| {
                s.close_gen == generation && !self.link.is_connected() && !self.link.is_stopping()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if self.link.is_stopping() {
            return Err(Error::Shutdown);
        }
        if slot.close_gen != generation {
            return Err(Error::ConnectionReset);
        }
        debug!(port = self.port, "channel connected");
        Ok(())
    }

    fn close(&self) {
        let mut slot = self.lock();
        if !slot.closed {
            debug!(port = self.port, "channel closed");
        }
        slot.closed = true;
        slot.close_gen = slot.close_gen.wrapping_add(1);
        slot.requested = None;
        slot.delivered = None;
        self.cond.notify_all();
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut slot = self.lock();
        if slot.closed {
            return Err(Error::ConnectionReset);
        }

        let mut filled = 0;
        slot.requested = Some(buf.len());
        self.cond.notify_all();

        loop {
            slot = self
                .cond
                .wait_while(slot, |s| !s.closed && s.delivered.is_none())
                .unwrap_or_else(PoisonError::into_inner);

            if slot.closed {
                slot.requested = None;
                return Err(Error::ConnectionReset);
            }

            if let Some(chunk) = slot.delivered.take() {
                let n = chunk.len().min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&chunk[..n]);
                filled += n;
            }

            if filled == buf.len() {
                return Ok(filled);
            }

            slot.requested = Some(buf.len() - filled);
            self.cond.notify_all();
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return self.link.write(self.port, buf);
        }
        for chunk in buf.chunks(MAX_FRAME_DATA) {
            self.link.write(self.port, chunk)?;
        }
        Ok(buf.len())
    }
}
