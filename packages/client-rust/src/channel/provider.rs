//! Node registry and channel selection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{ChannelCredentials, ClockSource, RemoteError, ServiceContractDescriptor};
use tracing::{debug, warn};
use url::Url;

use super::{Channel, ChannelConnector, ChannelMetadata, ChannelNode};
use crate::config::{BindingSettings, ConfigError, RemoteServiceSettings};

/// Hands out channels for service contracts, transparently skipping
/// blacked-out endpoints.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Channel on the first live node, in registration order. When every node
    /// is blacked out, a channel on the nominal primary is returned anyway.
    async fn get_primary(
        &self,
        contract: Arc<ServiceContractDescriptor>,
        credentials: Option<ChannelCredentials>,
    ) -> Result<Arc<dyn Channel>, RemoteError>;

    /// Blacks out the node `failed` came from and returns a channel on the
    /// next live node, or `None` when no node is left.
    async fn get_failover(
        &self,
        failed: &dyn Channel,
    ) -> Result<Option<Arc<dyn Channel>>, RemoteError>;
}

/// Channel provider over a fixed node list: the primary base URL followed by
/// the optional failover base URL.
pub struct StaticChannelProvider {
    nodes: Mutex<Vec<ChannelNode>>,
    connector: Arc<dyn ChannelConnector>,
    binding: BindingSettings,
    blackout_time: Duration,
    clock: Arc<dyn ClockSource>,
}

impl StaticChannelProvider {
    /// # Errors
    ///
    /// Returns the settings validation error, if any.
    pub fn new(
        settings: &RemoteServiceSettings,
        connector: Arc<dyn ChannelConnector>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, ConfigError> {
        let nodes = settings
            .validate()?
            .into_iter()
            .map(ChannelNode::new)
            .collect();
        Ok(Self {
            nodes: Mutex::new(nodes),
            connector,
            binding: settings.binding(),
            blackout_time: settings.failed_endpoint_blackout_time,
            clock,
        })
    }

    /// Copy of the registry, for inspection.
    #[must_use]
    pub fn nodes(&self) -> Vec<ChannelNode> {
        self.nodes.lock().clone()
    }

    #[must_use]
    pub fn is_blacked_out(&self, endpoint: &Url) -> bool {
        let now = self.clock.now_ms();
        self.nodes
            .lock()
            .iter()
            .any(|node| node.endpoint() == endpoint && node.is_blacked_out(now))
    }

    fn first_live(nodes: &[ChannelNode], now_ms: u64) -> Option<Url> {
        nodes
            .iter()
            .find(|node| !node.is_blacked_out(now_ms))
            .map(|node| node.endpoint().clone())
    }

    async fn connect(
        &self,
        endpoint: Url,
        contract: Arc<ServiceContractDescriptor>,
        credentials: Option<ChannelCredentials>,
    ) -> Result<Arc<dyn Channel>, RemoteError> {
        let metadata = ChannelMetadata::new(endpoint, contract, credentials)?;
        self.connector.connect(metadata, &self.binding).await
    }
}

#[async_trait]
impl ChannelProvider for StaticChannelProvider {
    async fn get_primary(
        &self,
        contract: Arc<ServiceContractDescriptor>,
        credentials: Option<ChannelCredentials>,
    ) -> Result<Arc<dyn Channel>, RemoteError> {
        let endpoint = {
            let nodes = self.nodes.lock();
            let now = self.clock.now_ms();
            match Self::first_live(&nodes, now) {
                Some(endpoint) => endpoint,
                None => {
                    let primary = nodes
                        .first()
                        .map(|node| node.endpoint().clone())
                        .ok_or_else(|| RemoteError::Unreachable {
                            contract: contract.name().to_string(),
                        })?;
                    debug!(endpoint = %primary, "all endpoints blacked out; using primary");
                    primary
                }
            }
        };
        self.connect(endpoint, contract, credentials).await
    }

    async fn get_failover(
        &self,
        failed: &dyn Channel,
    ) -> Result<Option<Arc<dyn Channel>>, RemoteError> {
        let metadata = failed.metadata();
        let next = {
            let mut nodes = self.nodes.lock();
            let now = self.clock.now_ms();
            match nodes
                .iter_mut()
                .find(|node| node.endpoint() == &metadata.node_endpoint)
            {
                Some(node) => node.blackout(now, self.blackout_time),
                None => warn!(
                    endpoint = %metadata.node_endpoint,
                    "failed channel does not belong to any registered node"
                ),
            }
            Self::first_live(&nodes, now)
        };

        match next {
            Some(endpoint) => {
                let channel = self
                    .connect(
                        endpoint,
                        Arc::clone(&metadata.contract),
                        metadata.credentials.clone(),
                    )
                    .await?;
                Ok(Some(channel))
            }
            None => Ok(None),
        }
    }
}
