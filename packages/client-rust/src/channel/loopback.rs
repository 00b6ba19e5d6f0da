//! In-process transport binding.
//!
//! [`LoopbackConnector`] routes channels to [`ServiceHost`]s registered under a
//! base URL. Hosts are resolved at call time, so registering or removing a
//! host takes effect for channels that already exist. Requests and replies are
//! encoded to bytes and decoded again on the far side, and the binding
//! enforces the send timeout and the maximum message size, as a wire binding
//! would.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use relay_core::clock::duration_ms;
use relay_core::{RemoteError, ReplyEnvelope, RequestEnvelope};
use url::Url;

use super::{Channel, ChannelConnector, ChannelMetadata, ChannelState};
use crate::config::BindingSettings;
use crate::context::CallContext;
use crate::host::ServiceHost;
use crate::intercept::InvocationTarget;

type HostTable = Arc<DashMap<Url, Arc<ServiceHost>>>;

/// Connector for hosts living in the same process.
#[derive(Default)]
pub struct LoopbackConnector {
    hosts: HostTable,
    requests: Arc<AtomicU64>,
}

impl LoopbackConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `host` under `base_url`, replacing any previous host.
    pub fn register(&self, base_url: Url, host: Arc<ServiceHost>) {
        self.hosts.insert(base_url, host);
    }

    /// Takes the host at `base_url` offline. Returns whether one was present.
    pub fn unregister(&self, base_url: &Url) -> bool {
        self.hosts.remove(base_url).is_some()
    }

    /// Number of requests that reached the transport, successful or not.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelConnector for LoopbackConnector {
    async fn connect(
        &self,
        metadata: ChannelMetadata,
        binding: &BindingSettings,
    ) -> Result<Arc<dyn Channel>, RemoteError> {
        Ok(Arc::new(LoopbackChannel {
            metadata,
            binding: binding.clone(),
            hosts: Arc::clone(&self.hosts),
            requests: Arc::clone(&self.requests),
            state: Mutex::new(ChannelState::Opened),
        }))
    }
}

/// Channel produced by [`LoopbackConnector`].
pub struct LoopbackChannel {
    metadata: ChannelMetadata,
    binding: BindingSettings,
    hosts: HostTable,
    requests: Arc<AtomicU64>,
    state: Mutex<ChannelState>,
}

impl LoopbackChannel {
    fn endpoint(&self) -> String {
        self.metadata.service_endpoint.to_string()
    }

    fn check_size(&self, len: usize) -> Result<(), RemoteError> {
        let limit = self.binding.max_received_message_size;
        if u64::try_from(len).unwrap_or(u64::MAX) > limit {
            return Err(RemoteError::Communication {
                endpoint: self.endpoint(),
                message: format!("message of {len} bytes exceeds the size quota of {limit} bytes"),
            });
        }
        Ok(())
    }

    async fn exchange(&self, request: RequestEnvelope) -> Result<ReplyEnvelope, RemoteError> {
        let host = self
            .hosts
            .get(&self.metadata.node_endpoint)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RemoteError::EndpointNotFound {
                endpoint: self.endpoint(),
            })?;

        let dispatch = host.dispatch(request);
        let reply = match self.binding.send_timeout {
            Some(timeout) => tokio::time::timeout(timeout, dispatch)
                .await
                .map_err(|_| RemoteError::Timeout {
                    endpoint: self.endpoint(),
                    timeout_ms: duration_ms(timeout),
                })??,
            None => dispatch.await?,
        };
        let bytes = serde_json::to_vec(&reply)?;
        self.check_size(bytes.len())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl InvocationTarget for LoopbackChannel {
    async fn invoke(
        &self,
        _context: &CallContext,
        request: &RequestEnvelope,
    ) -> Result<ReplyEnvelope, RemoteError> {
        // A faulted loopback channel keeps routing so that a host coming back
        // is seen by heartbeat probes on the same channel.
        if self.state() == ChannelState::Closed {
            return Err(RemoteError::ChannelClosed {
                endpoint: self.endpoint(),
            });
        }
        self.requests.fetch_add(1, Ordering::SeqCst);

        let mut outbound = request.clone();
        outbound.credentials.clone_from(&self.metadata.credentials);
        let bytes = serde_json::to_vec(&outbound)?;
        self.check_size(bytes.len())?;
        let outbound: RequestEnvelope = serde_json::from_slice(&bytes)?;

        let result = self.exchange(outbound).await;
        let mut state = self.state.lock();
        match (&result, *state) {
            (Err(err), ChannelState::Created | ChannelState::Opened) if err.is_transient() => {
                *state = ChannelState::Faulted;
            }
            (Ok(_), ChannelState::Faulted) => *state = ChannelState::Opened,
            _ => {}
        }
        drop(state);
        result
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn metadata(&self) -> &ChannelMetadata {
        &self.metadata
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        match *state {
            ChannelState::Closed => Ok(()),
            ChannelState::Faulted => Err(RemoteError::ChannelClosed {
                endpoint: self.endpoint(),
            }),
            ChannelState::Created | ChannelState::Opened => {
                *state = ChannelState::Closed;
                Ok(())
            }
        }
    }

    fn abort(&self) {
        *self.state.lock() = ChannelState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::{ApplicationFault, ChannelCredentials, ServiceContractDescriptor};
    use serde_json::json;

    use super::*;
    use crate::host::OperationTable;

    const BASE: &str = "https://node.example/";

    fn contract() -> Arc<ServiceContractDescriptor> {
        Arc::new(ServiceContractDescriptor::new("Relay.Echo"))
    }

    fn echo_host() -> Arc<ServiceHost> {
        let host = ServiceHost::new();
        host.register(Arc::new(
            OperationTable::new(contract())
                .operation("Echo", |_ctx, text: String| async move { Ok(text) })
                .operation("Fail", |_ctx, _req: ()| async {
                    Err::<(), _>(ApplicationFault::new("Nope", "rejected").into())
                }),
        ));
        Arc::new(host)
    }

    fn credentials() -> Option<ChannelCredentials> {
        Some(ChannelCredentials {
            user_name: "alice".to_string(),
            password: "token".to_string(),
        })
    }

    async fn channel(connector: &LoopbackConnector, binding: BindingSettings) -> Arc<dyn Channel> {
        let metadata =
            ChannelMetadata::new(Url::parse(BASE).unwrap(), contract(), credentials()).unwrap();
        connector.connect(metadata, &binding).await.unwrap()
    }

    fn echo(text: &str) -> RequestEnvelope {
        RequestEnvelope::new("Relay.Echo", "Echo", &json!(text)).unwrap()
    }

    #[tokio::test]
    async fn routes_to_registered_host() {
        let connector = LoopbackConnector::new();
        connector.register(Url::parse(BASE).unwrap(), echo_host());
        let channel = channel(&connector, BindingSettings::default()).await;

        let reply = channel.invoke(&CallContext::new(), &echo("hi")).await.unwrap();
        assert_eq!(reply.body, json!("hi"));
        assert_eq!(connector.request_count(), 1);
        assert_eq!(channel.state(), ChannelState::Opened);
    }

    #[tokio::test]
    async fn missing_host_is_endpoint_not_found_and_faults_channel() {
        let connector = LoopbackConnector::new();
        let channel = channel(&connector, BindingSettings::default()).await;

        let err = channel.invoke(&CallContext::new(), &echo("hi")).await.unwrap_err();
        assert!(err.is_endpoint_not_found());
        assert_eq!(channel.state(), ChannelState::Faulted);
        assert!(channel.close().await.is_err());
        channel.abort();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn faulted_channel_recovers_when_host_returns() {
        let connector = LoopbackConnector::new();
        let channel = channel(&connector, BindingSettings::default()).await;
        assert!(channel.invoke(&CallContext::new(), &echo("a")).await.is_err());
        assert_eq!(channel.state(), ChannelState::Faulted);

        connector.register(Url::parse(BASE).unwrap(), echo_host());
        let reply = channel.invoke(&CallContext::new(), &echo("b")).await.unwrap();
        assert_eq!(reply.body, json!("b"));
        assert_eq!(channel.state(), ChannelState::Opened);
    }

    #[tokio::test]
    async fn faults_leave_channel_open() {
        let connector = LoopbackConnector::new();
        connector.register(Url::parse(BASE).unwrap(), echo_host());
        let channel = channel(&connector, BindingSettings::default()).await;

        let request = RequestEnvelope::new("Relay.Echo", "Fail", &()).unwrap();
        let err = channel.invoke(&CallContext::new(), &request).await.unwrap_err();
        assert!(err.is_fault());
        assert_eq!(channel.state(), ChannelState::Opened);
    }

    #[tokio::test]
    async fn oversized_messages_exceed_quota() {
        let connector = LoopbackConnector::new();
        connector.register(Url::parse(BASE).unwrap(), echo_host());
        let binding = BindingSettings {
            max_received_message_size: 64,
            ..BindingSettings::default()
        };
        let channel = channel(&connector, binding).await;

        let err = channel
            .invoke(&CallContext::new(), &echo(&"x".repeat(256)))
            .await
            .unwrap_err();
        match err {
            RemoteError::Communication { message, .. } => assert!(message.contains("quota")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_timeout_is_enforced() {
        let connector = LoopbackConnector::new();
        let host = ServiceHost::new();
        host.register(Arc::new(OperationTable::new(contract()).operation(
            "Echo",
            |_ctx, text: String| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(text)
            },
        )));
        connector.register(Url::parse(BASE).unwrap(), Arc::new(host));
        let binding = BindingSettings {
            send_timeout: Some(Duration::from_secs(1)),
            ..BindingSettings::default()
        };
        let channel = channel(&connector, binding).await;

        let err = channel.invoke(&CallContext::new(), &echo("slow")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout { timeout_ms: 1_000, .. }));
    }

    #[tokio::test]
    async fn closed_channel_rejects_calls() {
        let connector = LoopbackConnector::new();
        connector.register(Url::parse(BASE).unwrap(), echo_host());
        let channel = channel(&connector, BindingSettings::default()).await;
        channel.close().await.unwrap();
        channel.close().await.unwrap();

        let err = channel.invoke(&CallContext::new(), &echo("hi")).await.unwrap_err();
        assert!(matches!(err, RemoteError::ChannelClosed { .. }));
        assert_eq!(connector.request_count(), 0);
    }
}
