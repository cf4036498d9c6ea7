//! Port multiplexer over a single transport.
//!
//! One background thread owns the read side of the transport: it
//! (re)connects, reads frames, and routes each payload to the
//! [`PortChannel`] bound to the frame's port. Writers from any thread go
//! through one shared write lock so frames never interleave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use edgelink_proto::{FrameHeader, HEADER_SIZE};
use tracing::{debug, info, warn};

use crate::channel::{Channel, PortChannel};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Transport plus connection state, shared by the manager and its channels.
pub(crate) struct Link {
    transport: Arc<dyn Transport>,
    write_lock: Mutex<()>,
    connected: AtomicBool,
    stopping: AtomicBool,
    wake: (Mutex<()>, Condvar),
    config: LinkConfig,
}

impl Link {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Sends one frame. The header and payload go out under the write lock.
    pub(crate) fn write(&self, port: u32, data: &[u8]) -> Result<usize> {
        let header = FrameHeader::for_payload(port, data)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.transport.write(&header.encode())?;
        if !data.is_empty() {
            self.transport.write(data)?;
        }
        Ok(data.len())
    }

    /// Sleeps for the reconnect period or until stop is requested.
    fn wait_reconnect(&self) {
        let (lock, cond) = &self.wake;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = cond
            .wait_timeout_while(guard, self.config.reconnect_period(), |_| !self.is_stopping())
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn request_stop(&self) -> bool {
        let first = !self.stopping.swap(true, Ordering::AcqRel);
        let (lock, cond) = &self.wake;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        cond.notify_all();
        first
    }
}

struct Shared {
    link: Arc<Link>,
    table: Mutex<HashMap<u32, Arc<PortChannel>>>,
    /// Signalled when a channel is added or stop is requested.
    table_cond: Condvar,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, HashMap<u32, Arc<PortChannel>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels(&self) -> Vec<Arc<PortChannel>> {
        self.table().values().cloned().collect()
    }

    fn run(&self) {
        let link = &self.link;
        while !link.is_stopping() {
            if let Err(err) = link.transport.open() {
                debug!(%err, "transport open failed");
                link.wait_reconnect();
                continue;
            }

            link.connected.store(true, Ordering::Release);
            info!("link connected");
            for channel in self.channels() {
                channel.notify();
            }

            if let Err(err) = self.read_loop() {
                if !link.is_stopping() {
                    warn!(%err, "link read loop failed");
                }
            }

            if let Err(err) = link.transport.close() {
                debug!(%err, "transport close failed");
            }
            link.connected.store(false, Ordering::Release);
            for channel in self.channels() {
                channel.close();
            }
            info!("link disconnected");

            if !link.is_stopping() {
                link.wait_reconnect();
            }
        }
        debug!("channel manager thread exited");
    }

    fn read_loop(&self) -> Result<()> {
        let link = &self.link;
        loop {
            self.wait_for_channels()?;

            let mut raw = [0u8; HEADER_SIZE];
            link.transport.read(&mut raw)?;
            let header = FrameHeader::decode(&raw);
            header.validate()?;

            let mut payload = vec![0u8; header.len()];
            if !payload.is_empty() {
                link.transport.read(&mut payload)?;
            }

            if let Err(err) = header.verify(&payload) {
                warn!(port = header.port, size = header.len(), %err, "dropping corrupted frame");
                continue;
            }

            let channel = self.table().get(&header.port).cloned();
            let Some(channel) = channel else {
                warn!(port = header.port, size = header.len(), "dropping frame for unknown port");
                continue;
            };

            self.deliver(&channel, Bytes::from(payload));
        }
    }

    fn wait_for_channels(&self) -> Result<()> {
        let table = self.table();
        let _table = self
            .table_cond
            .wait_while(table, |t| t.is_empty() && !self.link.is_stopping())
            .unwrap_or_else(PoisonError::into_inner);
        if self.link.is_stopping() {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    fn deliver(&self, channel: &PortChannel, mut data: Bytes) {
        let timeout = self.link.config.wait_read_timeout();
        while !data.is_empty() {
            match channel.wait_read(timeout) {
                Ok(wanted) => {
                    let chunk = data.split_to(wanted.min(data.len()));
                    channel.read_done(chunk);
                }
                Err(err) => {
                    warn!(port = channel.port(), dropped = data.len(), %err, "dropping frame remainder");
                    return;
                }
            }
        }
    }
}

/// Multiplexes many [`PortChannel`]s over one [`Transport`].
///
/// Dropping the manager stops its thread.
pub struct ChannelManager {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl ChannelManager {
    /// Binds `transport` and starts the connection thread.
    pub fn init(transport: Arc<dyn Transport>, config: LinkConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            link: Arc::new(Link {
                transport,
                write_lock: Mutex::new(()),
                connected: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                wake: (Mutex::new(()), Condvar::new()),
                config,
            }),
            table: Mutex::new(HashMap::new()),
            table_cond: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("edgelink-manager".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Returns the channel bound to `port`, creating it if needed.
    pub fn create_channel(&self, port: u32) -> Result<Arc<PortChannel>> {
        let mut table = self.shared.table();
        if let Some(channel) = table.get(&port) {
            return Ok(Arc::clone(channel));
        }

        let capacity = self.shared.link.config.max_channels;
        if table.len() >= capacity {
            return Err(Error::OutOfRange { capacity });
        }

        let channel = Arc::new(PortChannel::new(port, Arc::clone(&self.shared.link)));
        table.insert(port, Arc::clone(&channel));
        self.shared.table_cond.notify_all();
        debug!(port, "channel created");
        Ok(channel)
    }

    /// Removes and closes the channel bound to `port`.
    pub fn delete_channel(&self, port: u32) -> Result<()> {
        let channel = self
            .shared
            .table()
            .remove(&port)
            .ok_or(Error::NotFound(port))?;
        channel.close();
        debug!(port, "channel deleted");
        Ok(())
    }

    /// Sends `data` as one frame to `port`. Returns the payload size.
    pub fn write(&self, port: u32, data: &[u8]) -> Result<usize> {
        self.shared.link.write(port, data)
    }

    /// Returns `true` while the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    /// Stops the connection thread and closes every channel.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        let link = &self.shared.link;
        if link.request_stop() {
            info!("stopping channel manager");
        }

        {
            let _table = self.shared.table();
            self.shared.table_cond.notify_all();
        }
        if let Err(err) = link.transport.close() {
            debug!(%err, "transport close failed");
        }
        for channel in self.shared.channels() {
            channel.close();
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("channel manager thread panicked");
            }
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.stop();
    }
}
