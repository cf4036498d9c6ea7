//! Channel setup for one logical service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::ClockGate;
use crate::channel::Channel;
use crate::config::{LinkConfig, ServicePorts};
use crate::error::{Error, Result};
use crate::manager::ChannelManager;
use crate::pbhandler::{MessageHandler, MessageSender, PbHandler};
use crate::tls::{CertLoader, CertProvider, TlsChannel};

/// Subscribers one [`ServiceClient`] notifies.
pub const MAX_CONNECTION_SUBSCRIBERS: usize = 2;

/// Everything needed to secure a service channel.
#[derive(Clone)]
pub struct TlsSettings {
    /// Name the server certificate must carry.
    pub server_name: String,
    /// PEM bundle of trusted root CAs.
    pub root_ca: Vec<u8>,
    /// Certificate lookup.
    pub provider: Arc<dyn CertProvider>,
    /// Certificate and key loading.
    pub loader: Arc<dyn CertLoader>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Told when a service connects to or loses the endpoint.
pub trait ConnectionSubscriber: Send + Sync {
    /// The service channel is up.
    fn on_connect(&self);

    /// The service channel went down.
    fn on_disconnect(&self);
}

/// Forwards to the service handler, then to the subscribers.
struct Notifier<H> {
    inner: Arc<H>,
    subscribers: Mutex<Vec<Arc<dyn ConnectionSubscriber>>>,
}

impl<H> Notifier<H> {
    fn subscribers(&self) -> Vec<Arc<dyn ConnectionSubscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<H: MessageHandler> MessageHandler for Notifier<H> {
    fn on_connect(&self, sender: &MessageSender) {
        self.inner.on_connect(sender);
        for subscriber in self.subscribers() {
            subscriber.on_connect();
        }
    }

    fn on_disconnect(&self) {
        self.inner.on_disconnect();
        for subscriber in self.subscribers() {
            subscriber.on_disconnect();
        }
    }

    fn receive_message(&self, data: &[u8], sender: &MessageSender) -> Result<()> {
        self.inner.receive_message(data, sender)
    }
}

/// Holds back `connect` until the node clock is synced.
struct ClockGated {
    inner: Arc<dyn Channel>,
    gate: Arc<ClockGate>,
    wait: Duration,
    close_gen: AtomicU64,
}

impl Channel for ClockGated {
    fn connect(&self) -> Result<()> {
        let generation = self.close_gen.load(Ordering::Acquire);
        if !self.gate.wait_synced(self.wait, || {
            self.close_gen.load(Ordering::Acquire) != generation
        }) {
            if self.close_gen.load(Ordering::Acquire) != generation {
                return Err(Error::ConnectionReset);
            }
            debug!("clock not synced, secure connect deferred");
            return Err(Error::Timeout);
        }
        self.inner.connect()
    }

    fn close(&self) {
        self.close_gen.fetch_add(1, Ordering::AcqRel);
        self.gate.notify();
        self.inner.close();
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.inner.write(buf)
    }
}

/// Runs a service on its open port before provisioning and on its secure
/// port, behind TLS, afterwards.
///
/// Switching modes re-creates the channel and restarts the handler. Do not
/// switch or stop from inside the handler's own callbacks: stopping joins
/// the pump thread they run on.
pub struct ServiceClient<H> {
    name: String,
    manager: Arc<ChannelManager>,
    ports: ServicePorts,
    cert_type: String,
    tls: TlsSettings,
    clock: Option<Arc<ClockGate>>,
    reconnect_period: Duration,
    handler: PbHandler<Notifier<H>>,
    /// Serialises mode switches.
    switch: Mutex<()>,
    active: Mutex<Option<u32>>,
}

impl<H> std::fmt::Debug for ServiceClient<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("name", &self.name)
            .field("port", &self.port())
            .finish_non_exhaustive()
    }
}

impl<H> ServiceClient<H> {
    /// Port currently in use, if started.
    pub fn port(&self) -> Option<u32> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops the handler and releases the channel. Idempotent.
    pub fn stop(&self) {
        let _switch = self.switch.lock().unwrap_or_else(PoisonError::into_inner);
        self.handler.stop();
        let port = self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(port) = port {
            release(&self.manager, port);
            debug!(name = %self.name, port, "service stopped");
        }
    }

    /// Sender writing to the active channel.
    pub fn sender(&self) -> MessageSender {
        self.handler.sender()
    }

    /// The service handler.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler.handler().inner
    }

    /// Registers `subscriber` for connect and disconnect notifications.
    ///
    /// Fails with [`Error::OutOfRange`] once
    /// [`MAX_CONNECTION_SUBSCRIBERS`] are registered.
    pub fn subscribe(&self, subscriber: Arc<dyn ConnectionSubscriber>) -> Result<()> {
        let mut subscribers = self
            .handler
            .handler()
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.len() >= MAX_CONNECTION_SUBSCRIBERS {
            return Err(Error::OutOfRange {
                capacity: MAX_CONNECTION_SUBSCRIBERS,
            });
        }
        subscribers.push(subscriber);
        Ok(())
    }

    /// Removes `subscriber`. Unknown subscribers are ignored.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn ConnectionSubscriber>) {
        self.handler
            .handler()
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| !Arc::ptr_eq(s, subscriber));
    }
}

impl<H: MessageHandler> ServiceClient<H> {
    /// Creates a stopped client. `cert_type` secures the secure port.
    pub fn new(
        name: impl Into<String>,
        manager: Arc<ChannelManager>,
        ports: ServicePorts,
        cert_type: impl Into<String>,
        tls: TlsSettings,
        handler: Arc<H>,
        config: &LinkConfig,
    ) -> Self {
        let notifier = Notifier {
            inner: handler,
            subscribers: Mutex::new(Vec::new()),
        };
        Self {
            name: name.into(),
            manager,
            ports,
            cert_type: cert_type.into(),
            tls,
            clock: None,
            reconnect_period: config.reconnect_period(),
            handler: PbHandler::new(Arc::new(notifier), config),
            switch: Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    /// Defers secure connects until `gate` reports a synced clock.
    #[must_use]
    pub fn with_clock_gate(mut self, gate: Arc<ClockGate>) -> Self {
        self.clock = Some(gate);
        self
    }

    /// Starts the service in the mode matching `provisioned`.
    pub fn start(&self, provisioned: bool) -> Result<()> {
        self.set_provisioned(provisioned)
    }

    /// Moves the service to its secure port (`true`) or open port
    /// (`false`). A no-op when already running in that mode.
    pub fn set_provisioned(&self, provisioned: bool) -> Result<()> {
        let (port, cert_type) = if provisioned {
            (self.ports.secure, self.cert_type.as_str())
        } else {
            (self.ports.open, "")
        };

        let _switch = self.switch.lock().unwrap_or_else(PoisonError::into_inner);
        if self.port() == Some(port) && self.handler.is_started() {
            return Ok(());
        }

        self.handler.stop();
        let old = self.active.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(old) = old {
            release(&self.manager, old);
        }

        let started = self.open_channel(port, cert_type).and_then(|channel| {
            self.handler.init(self.name.as_str(), channel)?;
            self.handler.start()
        });
        if let Err(err) = started {
            release(&self.manager, port);
            return Err(err);
        }

        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(port);
        info!(name = %self.name, port, secure = provisioned, "service started");
        Ok(())
    }

    fn open_channel(&self, port: u32, cert_type: &str) -> Result<Arc<dyn Channel>> {
        let tls = TlsChannel::new(
            self.name.as_str(),
            &self.tls.server_name,
            self.tls.root_ca.clone(),
            Arc::clone(&self.tls.provider),
            Arc::clone(&self.tls.loader),
            self.manager.create_channel(port)?,
        )?;
        tls.set_tls_config(cert_type)?;

        match &self.clock {
            Some(gate) if !cert_type.is_empty() => Ok(Arc::new(ClockGated {
                inner: Arc::new(tls),
                gate: Arc::clone(gate),
                wait: self.reconnect_period,
                close_gen: AtomicU64::new(0),
            })),
            _ => Ok(Arc::new(tls)),
        }
    }
}

impl<H> Drop for ServiceClient<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn release(manager: &ChannelManager, port: u32) {
    match manager.delete_channel(port) {
        Ok(()) | Err(Error::NotFound(_)) => {}
        Err(err) => debug!(port, %err, "failed to delete channel"),
    }
}
