//! Assembly of the client and server interceptor lists.
//!
//! Client order, outermost first: disposal guard, additional interceptors,
//! response cache, gating, culture, failover. Server order: culture,
//! additional interceptors, response cache. Optional stages are left out when
//! their collaborator is not configured.

use std::sync::Arc;

use super::{CultureClientAdvice, CultureServerAdvice, DisposalGuard, Interceptor, InterceptorList};
use crate::cache::{
    CacheProvider, ClientCachingStrategy, DirectiveTable, ResponseCachingAdvice,
    ServerCachingStrategy, DEFAULT_RESPONSE_CACHE,
};
use crate::channel::{Channel, ChannelProvider, FailoverAdvice};
use crate::host::ServiceHandler;
use crate::online::{GatingAdvice, OnlineMonitor};

pub type ClientInterceptor = Arc<dyn Interceptor<dyn Channel>>;
pub type ServerInterceptor = Arc<dyn Interceptor<dyn ServiceHandler>>;

/// Extension point contributing interceptors to either site. They are spliced
/// in outside all built-in advices except the disposal guard; no ordering is
/// guaranteed among interceptors from different providers.
pub trait AdditionalInterceptorProvider: Send + Sync {
    fn client_interceptors(&self) -> Vec<ClientInterceptor> {
        Vec::new()
    }

    fn server_interceptors(&self) -> Vec<ServerInterceptor> {
        Vec::new()
    }
}

/// Provider with fixed interceptor lists.
#[derive(Default, Clone)]
pub struct StaticInterceptorProvider {
    client: Vec<ClientInterceptor>,
    server: Vec<ServerInterceptor>,
}

impl StaticInterceptorProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client(mut self, interceptor: ClientInterceptor) -> Self {
        self.client.push(interceptor);
        self
    }

    #[must_use]
    pub fn with_server(mut self, interceptor: ServerInterceptor) -> Self {
        self.server.push(interceptor);
        self
    }
}

impl AdditionalInterceptorProvider for StaticInterceptorProvider {
    fn client_interceptors(&self) -> Vec<ClientInterceptor> {
        self.client.clone()
    }

    fn server_interceptors(&self) -> Vec<ServerInterceptor> {
        self.server.clone()
    }
}

/// Collaborators of the client-side interceptor list.
#[derive(Default, Clone)]
pub struct ClientPipeline {
    pub additional: Vec<Arc<dyn AdditionalInterceptorProvider>>,
    pub cache: Option<Arc<dyn CacheProvider>>,
    pub cache_id: Option<String>,
    pub monitor: Option<Arc<OnlineMonitor>>,
    pub failover: Option<Arc<dyn ChannelProvider>>,
}

impl ClientPipeline {
    #[must_use]
    pub fn build(&self) -> InterceptorList<dyn Channel> {
        let mut list: Vec<ClientInterceptor> = vec![Arc::new(DisposalGuard)];
        for provider in &self.additional {
            list.extend(provider.client_interceptors());
        }
        if let Some(cache) = &self.cache {
            let cache_id = self.cache_id.as_deref().unwrap_or(DEFAULT_RESPONSE_CACHE);
            list.push(Arc::new(ResponseCachingAdvice::with_cache_id(
                Arc::clone(cache),
                cache_id,
                ClientCachingStrategy,
            )));
        }
        if let Some(monitor) = &self.monitor {
            list.push(Arc::new(GatingAdvice::new(Arc::clone(monitor))));
        }
        list.push(Arc::new(CultureClientAdvice));
        if let Some(provider) = &self.failover {
            list.push(Arc::new(FailoverAdvice::new(Arc::clone(provider))));
        }
        list.into()
    }
}

/// Collaborators of the server-side interceptor list.
#[derive(Default, Clone)]
pub struct ServerPipeline {
    pub additional: Vec<Arc<dyn AdditionalInterceptorProvider>>,
    pub cache: Option<(Arc<dyn CacheProvider>, Arc<DirectiveTable>)>,
}

impl ServerPipeline {
    #[must_use]
    pub fn with_additional(mut self, provider: Arc<dyn AdditionalInterceptorProvider>) -> Self {
        self.additional.push(provider);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, provider: Arc<dyn CacheProvider>, table: Arc<DirectiveTable>) -> Self {
        self.cache = Some((provider, table));
        self
    }

    #[must_use]
    pub fn build(&self) -> InterceptorList<dyn ServiceHandler> {
        let mut list: Vec<ServerInterceptor> = vec![Arc::new(CultureServerAdvice)];
        for provider in &self.additional {
            list.extend(provider.server_interceptors());
        }
        if let Some((cache, table)) = &self.cache {
            list.push(Arc::new(ResponseCachingAdvice::new(
                Arc::clone(cache),
                ServerCachingStrategy::new(Arc::clone(table)),
            )));
        }
        list.into()
    }
}
