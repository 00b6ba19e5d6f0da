//! Remote channels and the channel provider.
//!
//! A [`Channel`] is a live handle to one service endpoint for one contract.
//! Channels are built by a [`ChannelConnector`] (the transport binding) and
//! handed out by a [`provider::ChannelProvider`], which owns the node registry
//! and its blackout bookkeeping.

pub mod failover;
pub mod loopback;
pub mod node;
pub mod provider;

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{ChannelCredentials, RemoteError, ServiceContractDescriptor};
use url::Url;

use crate::config::BindingSettings;
use crate::intercept::InvocationTarget;

pub use failover::FailoverAdvice;
pub use loopback::{LoopbackChannel, LoopbackConnector};
pub use node::ChannelNode;
pub use provider::{ChannelProvider, StaticChannelProvider};

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Opened,
    /// A transport failure left the channel unusable; it can only be aborted.
    Faulted,
    Closed,
}

/// Identifying metadata attached to every channel, so that a failed channel
/// can be mapped back to the node it was created for.
#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    /// Base URL of the originating node.
    pub node_endpoint: Url,
    /// Node base URL joined with the contract name.
    pub service_endpoint: Url,
    pub contract: Arc<ServiceContractDescriptor>,
    pub credentials: Option<ChannelCredentials>,
}

impl ChannelMetadata {
    /// Builds metadata for `contract` hosted under `node_endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::EndpointNotFound` if the contract name cannot be
    /// joined onto the node URL.
    pub fn new(
        node_endpoint: Url,
        contract: Arc<ServiceContractDescriptor>,
        credentials: Option<ChannelCredentials>,
    ) -> Result<Self, RemoteError> {
        let service_endpoint =
            node_endpoint
                .join(contract.name())
                .map_err(|_| RemoteError::EndpointNotFound {
                    endpoint: format!("{node_endpoint}{}", contract.name()),
                })?;
        Ok(Self {
            node_endpoint,
            service_endpoint,
            contract,
            credentials,
        })
    }
}

/// A live connection to one endpoint for one service contract.
///
/// `close` and `abort` are idempotent; whichever runs first releases the
/// channel and the other becomes a no-op.
#[async_trait]
pub trait Channel: InvocationTarget {
    fn metadata(&self) -> &ChannelMetadata;

    fn state(&self) -> ChannelState;

    /// Graceful close.
    async fn close(&self) -> Result<(), RemoteError>;

    /// Immediate, infallible release.
    fn abort(&self);
}

/// Transport binding seam: creates channels for endpoints.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        metadata: ChannelMetadata,
        binding: &BindingSettings,
    ) -> Result<Arc<dyn Channel>, RemoteError>;
}
