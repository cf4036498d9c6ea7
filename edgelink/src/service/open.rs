//! Clock bootstrap on the open workload port.
//!
//! An unprovisioned node usually has no trustworthy clock, which breaks
//! certificate validity checks. The open handler asks the endpoint for the
//! current time on every connect and applies what it gets back. Secure
//! services wait on the shared [`ClockGate`] until that has happened.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use edgelink_proto::message::{
    self as msg, SmIncomingMessages, SmOutgoingMessages, sm_incoming_messages::SmIncomingMessage,
    sm_outgoing_messages::SmOutgoingMessage,
};
use prost::Message;
use tracing::{debug, info, warn};

use super::to_system_time;
use crate::error::{Error, Result};
use crate::pbhandler::{MessageHandler, MessageSender};

/// Applies wall-clock time received from the endpoint.
pub trait ClockSync: Send + Sync {
    /// Sets the node clock to `now`.
    fn sync(&self, now: SystemTime) -> Result<()>;
}

/// Whether the node clock has been synced with the endpoint.
#[derive(Debug, Default)]
pub struct ClockGate {
    synced: Mutex<bool>,
    cond: Condvar,
}

impl ClockGate {
    /// Creates an unsynced gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the clock has been synced.
    pub fn is_synced(&self) -> bool {
        *self.synced.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens or closes the gate.
    pub fn set_synced(&self, synced: bool) {
        let mut state = self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != synced {
            if synced {
                info!("clock synced");
            } else {
                warn!("clock unsynced");
            }
        }
        *state = synced;
        self.cond.notify_all();
    }

    /// Waits up to `timeout` for the clock to be synced. Returns early,
    /// unsynced, once `cancelled` holds.
    pub(crate) fn wait_synced(&self, timeout: Duration, cancelled: impl Fn() -> bool) -> bool {
        let state = self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |synced| !*synced && !cancelled())
            .unwrap_or_else(PoisonError::into_inner);
        *state
    }

    /// Wakes waiters so they re-check their cancel condition.
    pub(crate) fn notify(&self) {
        let _state = self.synced.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
}

/// Handler for the open workload port.
pub struct OpenHandler {
    clock: Arc<dyn ClockSync>,
    gate: Arc<ClockGate>,
}

impl std::fmt::Debug for OpenHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHandler")
            .field("synced", &self.gate.is_synced())
            .finish_non_exhaustive()
    }
}

impl OpenHandler {
    /// Creates a handler applying time through `clock`.
    pub fn new(clock: Arc<dyn ClockSync>) -> Self {
        Self {
            clock,
            gate: Arc::new(ClockGate::new()),
        }
    }

    /// Gate opened by the first successful clock sync.
    pub fn gate(&self) -> &Arc<ClockGate> {
        &self.gate
    }

    /// Asks the endpoint for a [`msg::ClockSync`].
    pub fn send_clock_sync_request(sender: &MessageSender) -> Result<()> {
        let request = SmOutgoingMessages {
            sm_outgoing_message: Some(SmOutgoingMessage::ClockSyncRequest(
                msg::ClockSyncRequest {},
            )),
        };
        sender.send_message(Some(&request))
    }
}

impl MessageHandler for OpenHandler {
    fn on_connect(&self, sender: &MessageSender) {
        if let Err(err) = Self::send_clock_sync_request(sender) {
            warn!(%err, "failed to request clock sync");
        }
    }

    fn receive_message(&self, data: &[u8], _sender: &MessageSender) -> Result<()> {
        let incoming = SmIncomingMessages::decode(data)?;
        match incoming.sm_incoming_message {
            Some(SmIncomingMessage::ClockSync(sync)) => {
                let ts = sync
                    .current_time
                    .ok_or_else(|| Error::InvalidMessage("clock sync without time".into()))?;
                let now = to_system_time(ts)?;
                debug!(seconds = ts.seconds, "clock sync received");
                self.clock.sync(now)?;
                self.gate.set_synced(true);
                Ok(())
            }
            Some(SmIncomingMessage::RunInstances(_)) => Err(Error::InvalidMessage(
                "run instances on open port".into(),
            )),
            None => Ok(()),
        }
    }
}
