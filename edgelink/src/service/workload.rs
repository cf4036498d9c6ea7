//! Workload orchestration service.

use std::sync::Arc;

use edgelink_proto::message::{
    InstanceInfo, InstanceStatus, RunInstancesStatus, SmIncomingMessages, SmOutgoingMessages,
    UpdateInstancesStatus, sm_incoming_messages::SmIncomingMessage,
    sm_outgoing_messages::SmOutgoingMessage,
};
use prost::Message;
use tracing::{debug, info, warn};

use super::{ClockSync, to_system_time};
use crate::error::Result;
use crate::pbhandler::{MessageHandler, MessageSender};

/// Starts and stops service instances.
pub trait Launcher: Send + Sync {
    /// Replaces the running set with `instances`.
    fn run_instances(&self, instances: &[InstanceInfo], force_restart: bool) -> Result<()>;
}

/// Handler for the workload service ports.
pub struct WorkloadService {
    launcher: Arc<dyn Launcher>,
    clock: Option<Arc<dyn ClockSync>>,
}

impl std::fmt::Debug for WorkloadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadService")
            .field("clock", &self.clock.is_some())
            .finish_non_exhaustive()
    }
}

impl WorkloadService {
    /// Creates the service on top of `launcher`.
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            clock: None,
        }
    }

    /// Also applies clock syncs received on this service.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Reports the full instance status after a run request.
    pub fn instances_run_status(sender: &MessageSender, instances: Vec<InstanceStatus>) -> Result<()> {
        debug!(count = instances.len(), "sending run status");
        send(
            sender,
            SmOutgoingMessage::RunInstancesStatus(RunInstancesStatus { instances }),
        )
    }

    /// Reports instances whose status changed.
    pub fn instances_update_status(
        sender: &MessageSender,
        instances: Vec<InstanceStatus>,
    ) -> Result<()> {
        debug!(count = instances.len(), "sending status update");
        send(
            sender,
            SmOutgoingMessage::UpdateInstancesStatus(UpdateInstancesStatus { instances }),
        )
    }
}

impl MessageHandler for WorkloadService {
    fn receive_message(&self, data: &[u8], sender: &MessageSender) -> Result<()> {
        let incoming = SmIncomingMessages::decode(data)?;
        match incoming.sm_incoming_message {
            Some(SmIncomingMessage::RunInstances(run)) => {
                info!(
                    count = run.instances.len(),
                    force_restart = run.force_restart,
                    "run instances requested"
                );
                self.launcher
                    .run_instances(&run.instances, run.force_restart)?;
                sender.send_message::<SmOutgoingMessages>(None)
            }
            Some(SmIncomingMessage::ClockSync(sync)) => match (&self.clock, sync.current_time) {
                (Some(clock), Some(ts)) => clock.sync(to_system_time(ts)?),
                _ => {
                    warn!("ignoring clock sync");
                    Ok(())
                }
            },
            None => Ok(()),
        }
    }
}

fn send(sender: &MessageSender, message: SmOutgoingMessage) -> Result<()> {
    sender.send_message(Some(&SmOutgoingMessages {
        sm_outgoing_message: Some(message),
    }))
}
