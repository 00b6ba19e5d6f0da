//! Entry point for acquiring remote service clients.

use std::sync::Arc;

use relay_core::{
    ChannelCredentials, ClockSource, RemoteError, ServiceContractDescriptor, SystemClock,
    UserCredentialsProvider,
};
use tracing::debug;

use crate::cache::CacheProvider;
use crate::channel::{Channel, ChannelConnector, ChannelProvider, StaticChannelProvider};
use crate::client::RemoteClient;
use crate::config::{ConfigError, RemoteServiceSettings};
use crate::context::CallContext;
use crate::intercept::{AdditionalInterceptorProvider, ClientPipeline, InterceptorList};
use crate::online::OnlineMonitor;

/// Builds [`RemoteClient`]s for service contracts from one settings bundle.
///
/// The client interceptor list is assembled once: disposal guard, additional
/// interceptors, response cache (with a cache provider), gating (with an
/// online monitor), culture, failover (with a failover URL).
pub struct RemoteServiceProvider {
    settings: RemoteServiceSettings,
    channels: Arc<dyn ChannelProvider>,
    credentials: Option<Arc<dyn UserCredentialsProvider>>,
    interceptors: InterceptorList<dyn Channel>,
}

impl RemoteServiceProvider {
    #[must_use]
    pub fn builder(
        settings: RemoteServiceSettings,
        connector: Arc<dyn ChannelConnector>,
    ) -> RemoteServiceProviderBuilder {
        RemoteServiceProviderBuilder {
            settings,
            connector,
            clock: Arc::new(SystemClock),
            channels: None,
            credentials: None,
            pipeline: ClientPipeline::default(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RemoteServiceSettings {
        &self.settings
    }

    #[must_use]
    pub fn channel_provider(&self) -> &Arc<dyn ChannelProvider> {
        &self.channels
    }

    /// Client for `contract` on the first live endpoint.
    ///
    /// Credentials are attached only when the contract requires
    /// authentication. They come from the configured credentials provider,
    /// or else from the current principal of `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the channel creation error.
    pub async fn get_service(
        &self,
        ctx: &CallContext,
        contract: Arc<ServiceContractDescriptor>,
    ) -> Result<RemoteClient, RemoteError> {
        let credentials = contract.requires_authentication().then(|| {
            match &self.credentials {
                Some(provider) => ChannelCredentials::from_provider(provider.as_ref()),
                None => ChannelCredentials::from_provider(ctx),
            }
        });
        let channel = self
            .channels
            .get_primary(Arc::clone(&contract), credentials)
            .await?;
        debug!(
            contract = %contract.name(),
            endpoint = %channel.metadata().service_endpoint,
            "remote service acquired"
        );
        Ok(RemoteClient::new(
            contract,
            channel,
            Arc::clone(&self.interceptors),
        ))
    }
}

/// Builder for [`RemoteServiceProvider`].
pub struct RemoteServiceProviderBuilder {
    settings: RemoteServiceSettings,
    connector: Arc<dyn ChannelConnector>,
    clock: Arc<dyn ClockSource>,
    channels: Option<Arc<dyn ChannelProvider>>,
    credentials: Option<Arc<dyn UserCredentialsProvider>>,
    pipeline: ClientPipeline,
}

impl RemoteServiceProviderBuilder {
    /// Clock used for endpoint blackouts.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the default [`StaticChannelProvider`].
    #[must_use]
    pub fn channel_provider(mut self, channels: Arc<dyn ChannelProvider>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Explicit credentials source, overriding the ambient principal.
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn UserCredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn additional_interceptors(
        mut self,
        provider: Arc<dyn AdditionalInterceptorProvider>,
    ) -> Self {
        self.pipeline.additional.push(provider);
        self
    }

    #[must_use]
    pub fn response_cache(mut self, cache: Arc<dyn CacheProvider>) -> Self {
        self.pipeline.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn response_cache_id(mut self, cache_id: impl Into<String>) -> Self {
        self.pipeline.cache_id = Some(cache_id.into());
        self
    }

    #[must_use]
    pub fn online_monitor(mut self, monitor: Arc<OnlineMonitor>) -> Self {
        self.pipeline.monitor = Some(monitor);
        self
    }

    /// # Errors
    ///
    /// Returns the settings validation error.
    pub fn build(self) -> Result<RemoteServiceProvider, ConfigError> {
        let channels = match self.channels {
            Some(channels) => {
                self.settings.validate()?;
                channels
            }
            None => Arc::new(StaticChannelProvider::new(
                &self.settings,
                self.connector,
                self.clock,
            )?),
        };
        let mut pipeline = self.pipeline;
        if self.settings.supports_failover() {
            pipeline.failover = Some(Arc::clone(&channels));
        }
        Ok(RemoteServiceProvider {
            interceptors: pipeline.build(),
            settings: self.settings,
            channels,
            credentials: self.credentials,
        })
    }
}
