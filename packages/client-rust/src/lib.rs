//! `relay` client: interception pipeline, endpoint failover, online gating,
//! response caching, session scopes, and server clock synchronisation.

pub mod auth;
pub mod cache;
pub mod channel;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod host;
pub mod intercept;
pub mod online;
pub mod provider;
pub mod telemetry;
pub mod worker;

pub use auth::{
    AuthenticationScope, AuthenticationService, RemoteAuthenticationService, SessionPrincipal,
};
pub use cache::{CacheClient, CacheProvider, DirectiveTable, MemoryCacheProvider};
pub use channel::{Channel, ChannelConnector, ChannelProvider, ChannelState, LoopbackConnector};
pub use client::RemoteClient;
pub use clock::{ClockSyncConfig, ClockSyncProvider, TimeKind, TimeService};
pub use config::{BindingSettings, ConfigError, RemoteServiceSettings};
pub use context::CallContext;
pub use host::{OperationTable, ServiceHandler, ServiceHost};
pub use intercept::{AdditionalInterceptorProvider, Interceptor, Invocation, InvocationKind};
pub use online::{OnlineMonitor, OnlineStatus};
pub use provider::{RemoteServiceProvider, RemoteServiceProviderBuilder};
