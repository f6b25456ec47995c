//! Sending task descriptors to the backend.

use std::sync::Arc;
use tracing::{debug, error};

use crate::client::handle::OutcomeHandle;
use crate::error::Result;
use crate::server::supervisor::ServerSupervisor;
use crate::shared::channel::Channel;
use crate::task::TaskDescriptor;

/// Turns descriptors into pending [`OutcomeHandle`]s.
///
/// A failure while sending is treated as corrupting backend state: the
/// supervised process is force-killed and the error returned.
#[derive(Debug, Clone)]
pub struct TaskSubmitter {
    channel: Channel,
    supervisor: Arc<ServerSupervisor>,
}

impl TaskSubmitter {
    /// Submitter over `channel`, killing through `supervisor` on failure.
    pub fn new(channel: Channel, supervisor: Arc<ServerSupervisor>) -> Self {
        Self {
            channel,
            supervisor,
        }
    }

    /// Send one task and return its pending handle. Does not wait for the
    /// outcome.
    pub async fn submit(&self, descriptor: &TaskDescriptor) -> Result<OutcomeHandle> {
        let request = descriptor.to_wire();
        match self.channel.submit_task(&request).await {
            Ok(reply) => {
                debug!(
                    request_id = reply.id(),
                    kind = %descriptor.kind(),
                    timeout_secs = request.timeout,
                    "task submitted"
                );
                Ok(OutcomeHandle::new(descriptor.kind(), reply))
            },
            Err(e) => {
                error!(error = %e, kind = %descriptor.kind(), "task submission failed");
                self.supervisor.force_kill();
                Err(e)
            },
        }
    }

    /// The channel tasks are sent on.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}
