//! Reentrant interception state machine.
//!
//! An [`Invocation`] records one in-flight call: its request, its reply, the
//! target that performs the real call, the ordered interceptor list and an
//! intercept cursor. [`Invocation::proceed`] advances the cursor by one,
//! dispatches to the interceptor at that position (or to the target once the
//! list is exhausted) and restores the cursor on the way out, success or
//! error. An interceptor may therefore call `proceed` repeatedly from the same
//! frame to resubmit the rest of the chain without being advanced past, and
//! without re-entering interceptors that already ran.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{RemoteError, ReplyEnvelope, RequestEnvelope, ServiceContractDescriptor};

use crate::context::CallContext;

/// Future returned by [`Invocation::proceed`].
pub type ProceedFuture<'a> = Pin<Box<dyn Future<Output = Result<(), RemoteError>> + Send + 'a>>;

/// Shared, ordered interceptor list. The first entry is the outermost.
pub type InterceptorList<T> = Arc<[Arc<dyn Interceptor<T>>]>;

/// The innermost element of every chain: performs the real call.
#[async_trait]
pub trait InvocationTarget: Send + Sync + 'static {
    async fn invoke(
        &self,
        context: &CallContext,
        request: &RequestEnvelope,
    ) -> Result<ReplyEnvelope, RemoteError>;
}

/// A unit of cross-cutting logic wrapped around a call.
///
/// Implementations either call [`Invocation::proceed`] (possibly several
/// times) or complete the invocation themselves by setting a reply.
#[async_trait]
pub trait Interceptor<T: ?Sized + InvocationTarget>: Send + Sync {
    async fn intercept(&self, invocation: &mut Invocation<T>) -> Result<(), RemoteError>;
}

/// What an invocation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// A regular service operation.
    Operation,
    /// The lightweight heartbeat probe; always let through by gating.
    Heartbeat,
    /// Release of the underlying channel. Never reaches the target.
    Dispose,
}

/// Mutable record of one in-flight call.
pub struct Invocation<T: ?Sized + InvocationTarget> {
    contract: Arc<ServiceContractDescriptor>,
    kind: InvocationKind,
    request: RequestEnvelope,
    reply: Option<ReplyEnvelope>,
    target: Arc<T>,
    interceptors: InterceptorList<T>,
    cursor: isize,
    context: CallContext,
}

impl<T: ?Sized + InvocationTarget> Invocation<T> {
    #[must_use]
    pub fn new(
        contract: Arc<ServiceContractDescriptor>,
        kind: InvocationKind,
        request: RequestEnvelope,
        target: Arc<T>,
        interceptors: InterceptorList<T>,
        context: CallContext,
    ) -> Self {
        Self {
            contract,
            kind,
            request,
            reply: None,
            target,
            interceptors,
            cursor: -1,
            context,
        }
    }

    /// Runs the rest of the chain from the current position.
    pub fn proceed(&mut self) -> ProceedFuture<'_> {
        Box::pin(async move {
            self.cursor += 1;
            let next = usize::try_from(self.cursor)
                .ok()
                .and_then(|index| self.interceptors.get(index).cloned());
            let result = match next {
                Some(interceptor) => interceptor.intercept(self).await,
                None => self.invoke_target().await,
            };
            self.cursor -= 1;
            result
        })
    }

    async fn invoke_target(&mut self) -> Result<(), RemoteError> {
        if self.kind == InvocationKind::Dispose {
            return Ok(());
        }
        let reply = self.target.invoke(&self.context, &self.request).await?;
        self.reply = Some(reply);
        Ok(())
    }

    #[must_use]
    pub fn contract(&self) -> &Arc<ServiceContractDescriptor> {
        &self.contract
    }

    #[must_use]
    pub fn kind(&self) -> InvocationKind {
        self.kind
    }

    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.kind == InvocationKind::Heartbeat
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.request.operation
    }

    /// Default cache region: `"<contract>.<operation>"`.
    #[must_use]
    pub fn default_region(&self) -> String {
        self.contract.region_for(&self.request.operation)
    }

    #[must_use]
    pub fn request(&self) -> &RequestEnvelope {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestEnvelope {
        &mut self.request
    }

    #[must_use]
    pub fn reply(&self) -> Option<&ReplyEnvelope> {
        self.reply.as_ref()
    }

    pub fn reply_mut(&mut self) -> Option<&mut ReplyEnvelope> {
        self.reply.as_mut()
    }

    pub fn set_reply(&mut self, reply: ReplyEnvelope) {
        self.reply = Some(reply);
    }

    pub fn take_reply(&mut self) -> Option<ReplyEnvelope> {
        self.reply.take()
    }

    #[must_use]
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Replaces the target, e.g. after failing over to another channel.
    pub fn retarget(&mut self, target: Arc<T>) {
        self.target = target;
    }

    #[must_use]
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Current intercept cursor; `-1` outside of any `proceed` frame.
    #[must_use]
    pub fn cursor(&self) -> isize {
        self.cursor
    }
}
