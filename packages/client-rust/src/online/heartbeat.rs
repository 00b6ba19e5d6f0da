//! Heartbeat probe backed by a remote client.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::RemoteError;

use super::HeartbeatProbe;
use crate::client::RemoteClient;
use crate::context::CallContext;

/// Probes by calling the contract's heartbeat operation through a gated
/// client, so the outcome updates the monitor like any other call.
pub struct ClientHeartbeat {
    client: Arc<RemoteClient>,
    context: CallContext,
}

impl ClientHeartbeat {
    #[must_use]
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            context: CallContext::new(),
        }
    }
}

#[async_trait]
impl HeartbeatProbe for ClientHeartbeat {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.client.heartbeat(&self.context).await
    }
}
