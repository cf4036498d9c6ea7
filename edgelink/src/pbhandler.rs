//! Protobuf message pump on top of a [`Channel`].
//!
//! Each message travels as an envelope (`[u32 LE size][payload]`) written
//! with one channel write. The pump thread connects the channel, then
//! hands every received payload to a [`MessageHandler`] until the channel
//! fails, and starts over while the handler is started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use edgelink_proto::{ENVELOPE_HEADER_SIZE, encode_into, payload_len};
use prost::Message;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::LinkConfig;
use crate::error::{Error, Result};

/// Callbacks of one logical service.
pub trait MessageHandler: Send + Sync + 'static {
    /// Called after the channel connected, before the first message.
    fn on_connect(&self, _sender: &MessageSender) {}

    /// Called after the channel failed.
    fn on_disconnect(&self) {}

    /// Called once per received envelope with its payload.
    ///
    /// Errors are logged and the pump continues.
    fn receive_message(&self, data: &[u8], sender: &MessageSender) -> Result<()>;
}

struct Core {
    name: Mutex<String>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    started: AtomicBool,
    wake: (Mutex<()>, Condvar),
    reconnect_period: Duration,
    receive_capacity: usize,
    send_capacity: usize,
    /// Encoding buffer, also serialising concurrent senders.
    send_buf: Mutex<Vec<u8>>,
}

impl Core {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn name(&self) -> String {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::WrongState("handler not initialised"))
    }

    fn wait_reconnect(&self) {
        let (lock, cond) = &self.wake;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = cond
            .wait_timeout_while(guard, self.reconnect_period, |_| self.is_started())
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn wake(&self) {
        let (lock, cond) = &self.wake;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        cond.notify_all();
    }
}

/// Sends envelopes on behalf of a [`PbHandler`].
///
/// Cheap to clone; handed to every [`MessageHandler`] callback.
#[derive(Clone)]
pub struct MessageSender {
    core: Arc<Core>,
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender").finish_non_exhaustive()
    }
}

impl MessageSender {
    /// Serializes `msg` into one envelope and writes it. `None` sends a
    /// header-only envelope.
    pub fn send_message<M: Message>(&self, msg: Option<&M>) -> Result<()> {
        let channel = self.core.channel()?;
        let mut buf = self
            .core
            .send_buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        encode_into(&mut buf, msg, self.core.send_capacity)?;
        channel.write(&buf)?;
        Ok(())
    }
}

/// Runs a [`MessageHandler`] on its own pump thread.
pub struct PbHandler<H> {
    core: Arc<Core>,
    handler: Arc<H>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<H> std::fmt::Debug for PbHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbHandler")
            .field("name", &self.core.name())
            .field("started", &self.core.is_started())
            .finish_non_exhaustive()
    }
}

impl<H> PbHandler<H> {
    /// Stops the pump thread and closes the channel. Idempotent.
    pub fn stop(&self) {
        if self.core.started.swap(false, Ordering::AcqRel) {
            debug!(name = %self.core.name(), "stopping message handler");
        }
        self.core.wake();
        if let Ok(channel) = self.core.channel() {
            channel.close();
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(name = %self.core.name(), "message handler thread panicked");
            }
        }
    }

    /// Returns `true` between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    /// Sender writing to the bound channel.
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            core: Arc::clone(&self.core),
        }
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<H: MessageHandler> PbHandler<H> {
    /// Creates a stopped, unbound handler.
    pub fn new(handler: Arc<H>, config: &LinkConfig) -> Self {
        Self {
            core: Arc::new(Core {
                name: Mutex::new(String::new()),
                channel: Mutex::new(None),
                started: AtomicBool::new(false),
                wake: (Mutex::new(()), Condvar::new()),
                reconnect_period: config.reconnect_period(),
                receive_capacity: config.receive_buffer_size,
                send_capacity: config.send_buffer_size,
                send_buf: Mutex::new(Vec::new()),
            }),
            handler,
            thread: Mutex::new(None),
        }
    }

    /// Binds the handler to `channel`.
    pub fn init(&self, name: impl Into<String>, channel: Arc<dyn Channel>) -> Result<()> {
        if self.is_started() {
            return Err(Error::WrongState("handler already started"));
        }
        *self.core.name.lock().unwrap_or_else(PoisonError::into_inner) = name.into();
        *self.core.channel.lock().unwrap_or_else(PoisonError::into_inner) = Some(channel);
        Ok(())
    }

    /// Spawns the pump thread.
    pub fn start(&self) -> Result<()> {
        self.core.channel()?;
        if self.core.started.swap(true, Ordering::AcqRel) {
            return Err(Error::WrongState("handler already started"));
        }

        let core = Arc::clone(&self.core);
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("edgelink-pb-{}", self.core.name()))
            .spawn(move || run(&core, &*handler));

        match spawned {
            Ok(handle) => {
                *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.core.started.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Shortcut for [`MessageSender::send_message`].
    pub fn send_message<M: Message>(&self, msg: Option<&M>) -> Result<()> {
        self.sender().send_message(msg)
    }
}

impl<H> Drop for PbHandler<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<H: MessageHandler>(core: &Arc<Core>, handler: &H) {
    let sender = MessageSender {
        core: Arc::clone(core),
    };

    while core.is_started() {
        let name = core.name();
        let channel = match core.channel() {
            Ok(channel) => channel,
            Err(err) => {
                warn!(%name, %err, "message handler has no channel");
                return;
            }
        };

        if let Err(err) = channel.connect() {
            debug!(%name, %err, "channel connect failed");
            core.wait_reconnect();
            continue;
        }
        // Stop may have closed the channel just before connect reopened it.
        if !core.is_started() {
            break;
        }

        info!(%name, "message handler connected");
        handler.on_connect(&sender);

        if let Err(err) = receive_loop(core, &*channel, handler, &sender, &name) {
            debug!(%name, %err, "message handler disconnected");
        }
        handler.on_disconnect();
    }
}

fn receive_loop<H: MessageHandler>(
    core: &Core,
    channel: &dyn Channel,
    handler: &H,
    sender: &MessageSender,
    name: &str,
) -> Result<()> {
    let mut header = [0u8; ENVELOPE_HEADER_SIZE];
    let mut buf = Vec::new();

    loop {
        channel.read(&mut header)?;
        let size = payload_len(header);

        if size > core.receive_capacity {
            warn!(name, size, max = core.receive_capacity, "discarding oversized message");
            discard(channel, size, core.receive_capacity)?;
            continue;
        }

        buf.resize(size, 0);
        if size > 0 {
            channel.read(&mut buf)?;
        }

        if let Err(err) = handler.receive_message(&buf, sender) {
            warn!(name, size, %err, "failed to handle message");
        }
    }
}

/// Reads and drops `size` bytes in bounded chunks.
fn discard(channel: &dyn Channel, mut size: usize, chunk: usize) -> Result<()> {
    let mut scratch = vec![0u8; chunk.clamp(1, 4096)];
    while size > 0 {
        let n = size.min(scratch.len());
        channel.read(&mut scratch[..n])?;
        size -= n;
    }
    Ok(())
}
