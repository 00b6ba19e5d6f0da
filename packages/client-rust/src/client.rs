//! The client-side decorator around a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use relay_core::{
    RemoteError, ReplyEnvelope, RequestEnvelope, ServiceContractDescriptor, ServiceRequest,
};
use serde::de::DeserializeOwned;

use crate::channel::failover::same_channel;
use crate::channel::Channel;
use crate::context::CallContext;
use crate::intercept::{InterceptorList, Invocation, InvocationKind};

/// Operation name used for the disposal invocation.
const DISPOSE_OPERATION: &str = "Dispose";

/// Typed access to one remote service contract.
///
/// Every call runs through the client interceptor list around the current
/// channel. When failover moves a call to another endpoint, the client adopts
/// the new channel for subsequent calls and aborts the one it replaced.
/// [`close`](Self::close) releases the channel through the disposal guard;
/// dropping an unclosed client aborts it.
pub struct RemoteClient {
    contract: Arc<ServiceContractDescriptor>,
    channel: ArcSwap<Arc<dyn Channel>>,
    interceptors: InterceptorList<dyn Channel>,
    disposed: AtomicBool,
}

impl RemoteClient {
    #[must_use]
    pub fn new(
        contract: Arc<ServiceContractDescriptor>,
        channel: Arc<dyn Channel>,
        interceptors: InterceptorList<dyn Channel>,
    ) -> Self {
        Self {
            contract,
            channel: ArcSwap::from_pointee(channel),
            interceptors,
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn contract(&self) -> &Arc<ServiceContractDescriptor> {
        &self.contract
    }

    /// The channel the next call will use.
    #[must_use]
    pub fn channel(&self) -> Arc<dyn Channel> {
        let current = self.channel.load();
        Arc::clone(&**current)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Calls `operation` with `request` and decodes the reply body.
    ///
    /// # Errors
    ///
    /// Whatever the pipeline surfaces: an application fault, a transient
    /// failure once no endpoint is left, `Unreachable` while gated, or a
    /// serialization error.
    pub async fn invoke<Req, Resp>(
        &self,
        ctx: &CallContext,
        operation: &str,
        request: &Req,
    ) -> Result<Resp, RemoteError>
    where
        Req: ServiceRequest + ?Sized,
        Resp: DeserializeOwned,
    {
        let envelope = RequestEnvelope::new(self.contract.name(), operation, request)?;
        self.call(ctx, envelope).await?.decode()
    }

    /// Sends a pre-built envelope.
    ///
    /// # Errors
    ///
    /// As for [`invoke`](Self::invoke); `MissingReply` if the pipeline
    /// completed without a reply.
    pub async fn call(
        &self,
        ctx: &CallContext,
        request: RequestEnvelope,
    ) -> Result<ReplyEnvelope, RemoteError> {
        let operation = request.operation.clone();
        self.execute(ctx, InvocationKind::Operation, request)
            .await?
            .ok_or(RemoteError::MissingReply { operation })
    }

    /// Issues the contract's heartbeat operation as a probe call.
    ///
    /// # Errors
    ///
    /// `UnknownOperation` if the contract declares no heartbeat, otherwise the
    /// probe call's error.
    pub async fn heartbeat(&self, ctx: &CallContext) -> Result<(), RemoteError> {
        let operation = self.contract.heartbeat_operation().ok_or_else(|| {
            RemoteError::UnknownOperation {
                contract: self.contract.name().to_string(),
                operation: "heartbeat".to_string(),
            }
        })?;
        let request = RequestEnvelope::new(self.contract.name(), operation, &())?;
        self.execute(ctx, InvocationKind::Heartbeat, request).await?;
        Ok(())
    }

    /// Releases the channel through the disposal guard. Later calls fail with
    /// `ChannelClosed`; closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only if the disposal invocation itself fails.
    pub async fn close(&self) -> Result<(), RemoteError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let request = RequestEnvelope::new(self.contract.name(), DISPOSE_OPERATION, &())?;
        self.run(&CallContext::new(), InvocationKind::Dispose, request)
            .await
            .map(|_| ())
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        kind: InvocationKind,
        request: RequestEnvelope,
    ) -> Result<Option<ReplyEnvelope>, RemoteError> {
        if self.is_closed() {
            return Err(RemoteError::ChannelClosed {
                endpoint: self.channel().metadata().service_endpoint.to_string(),
            });
        }
        self.run(ctx, kind, request).await
    }

    async fn run(
        &self,
        ctx: &CallContext,
        kind: InvocationKind,
        request: RequestEnvelope,
    ) -> Result<Option<ReplyEnvelope>, RemoteError> {
        let slot = self.channel.load_full();
        let mut invocation = Invocation::new(
            Arc::clone(&self.contract),
            kind,
            request,
            Arc::clone(&*slot),
            Arc::clone(&self.interceptors),
            ctx.clone(),
        );
        let result = invocation.proceed().await;
        self.adopt(&slot, invocation.target());
        result?;
        Ok(invocation.take_reply())
    }

    fn adopt(&self, previous: &Arc<Arc<dyn Channel>>, current: &Arc<dyn Channel>) {
        if same_channel(previous, current) {
            return;
        }
        let swapped = self
            .channel
            .compare_and_swap(previous, Arc::new(Arc::clone(current)));
        if Arc::ptr_eq(&*swapped, previous) {
            previous.abort();
        } else {
            // Another call already replaced the channel.
            current.abort();
        }
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.channel.load().abort();
        }
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("contract", &self.contract.name())
            .field("endpoint", &self.channel().metadata().service_endpoint.as_str())
            .field("closed", &self.is_closed())
            .finish()
    }
}
