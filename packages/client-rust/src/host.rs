//! Server interception site.
//!
//! A [`ServiceHost`] dispatches inbound [`RequestEnvelope`]s to the
//! [`ServiceHandler`] registered for their contract, running each call through
//! the server-side interceptor list (culture, additional, response cache).
//! [`OperationTable`] is the usual handler: a contract plus typed async
//! closures keyed by operation name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use relay_core::{
    ApplicationFault, RemoteError, ReplyEnvelope, RequestEnvelope, ServiceContractDescriptor,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::context::CallContext;
use crate::intercept::pipeline::ServerPipeline;
use crate::intercept::{InterceptorList, Invocation, InvocationKind, InvocationTarget};

/// Fault code returned when an authenticated contract is called anonymously.
pub const AUTHENTICATION_REQUIRED: &str = "AuthenticationRequired";

// ---------------------------------------------------------------------------
// ServiceHandler
// ---------------------------------------------------------------------------

/// Implementation of one service contract.
pub trait ServiceHandler: InvocationTarget {
    fn contract(&self) -> &Arc<ServiceContractDescriptor>;
}

// ---------------------------------------------------------------------------
// OperationTable
// ---------------------------------------------------------------------------

type BoxedReply = Pin<Box<dyn Future<Output = Result<ReplyEnvelope, RemoteError>> + Send>>;

type OperationFn = Arc<dyn Fn(CallContext, RequestEnvelope) -> BoxedReply + Send + Sync>;

/// Handler built from typed per-operation closures.
pub struct OperationTable {
    contract: Arc<ServiceContractDescriptor>,
    operations: HashMap<String, OperationFn>,
}

impl OperationTable {
    #[must_use]
    pub fn new(contract: Arc<ServiceContractDescriptor>) -> Self {
        Self {
            contract,
            operations: HashMap::new(),
        }
    }

    /// Registers `name`. The request body is decoded into `Req`; the returned
    /// `Resp` becomes the reply body.
    #[must_use]
    pub fn operation<Req, Resp, F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RemoteError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let op: OperationFn = Arc::new(move |ctx: CallContext, request: RequestEnvelope| -> BoxedReply {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let req: Req = serde_json::from_value(request.body)?;
                let resp = f(ctx, req).await?;
                ReplyEnvelope::from_response(&resp)
            })
        });
        self.operations.insert(name.into(), op);
        self
    }

    #[must_use]
    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }
}

#[async_trait]
impl InvocationTarget for OperationTable {
    async fn invoke(
        &self,
        context: &CallContext,
        request: &RequestEnvelope,
    ) -> Result<ReplyEnvelope, RemoteError> {
        let op = self
            .operations
            .get(&request.operation)
            .ok_or_else(|| RemoteError::UnknownOperation {
                contract: self.contract.name().to_string(),
                operation: request.operation.clone(),
            })?;
        op(context.clone(), request.clone()).await
    }
}

impl ServiceHandler for OperationTable {
    fn contract(&self) -> &Arc<ServiceContractDescriptor> {
        &self.contract
    }
}

// ---------------------------------------------------------------------------
// ServiceHost
// ---------------------------------------------------------------------------

/// Contract-keyed dispatcher with a server-side interceptor list.
pub struct ServiceHost {
    handlers: DashMap<String, Arc<dyn ServiceHandler>>,
    interceptors: InterceptorList<dyn ServiceHandler>,
}

impl ServiceHost {
    /// Host with the built-in server interceptors only.
    #[must_use]
    pub fn new() -> Self {
        Self::with_pipeline(&ServerPipeline::default())
    }

    #[must_use]
    pub fn with_pipeline(pipeline: &ServerPipeline) -> Self {
        Self {
            handlers: DashMap::new(),
            interceptors: pipeline.build(),
        }
    }

    /// Registers `handler` under its contract name, replacing any previous one.
    pub fn register(&self, handler: Arc<dyn ServiceHandler>) {
        let name = handler.contract().name().to_string();
        self.handlers.insert(name, handler);
    }

    #[must_use]
    pub fn hosts(&self, contract: &str) -> bool {
        self.handlers.contains_key(contract)
    }

    /// Runs `request` through the server pipeline and its handler.
    ///
    /// # Errors
    ///
    /// `EndpointNotFound` for an unhosted contract, an `AuthenticationRequired`
    /// fault for anonymous calls to an authenticated contract, and whatever the
    /// pipeline or handler returns.
    pub async fn dispatch(&self, request: RequestEnvelope) -> Result<ReplyEnvelope, RemoteError> {
        let handler = self
            .handlers
            .get(&request.contract)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RemoteError::EndpointNotFound {
                endpoint: request.contract.clone(),
            })?;
        let contract = Arc::clone(handler.contract());

        if contract.requires_authentication() && !has_credentials(&request) {
            debug!(
                contract = %contract.name(),
                operation = %request.operation,
                request_id = %request.request_id,
                "rejecting anonymous call"
            );
            return Err(ApplicationFault::new(
                AUTHENTICATION_REQUIRED,
                format!("{} requires an authenticated session", contract.name()),
            )
            .into());
        }

        let kind = if contract.heartbeat_operation() == Some(request.operation.as_str()) {
            InvocationKind::Heartbeat
        } else {
            InvocationKind::Operation
        };
        let operation = request.operation.clone();
        let mut invocation = Invocation::new(
            contract,
            kind,
            request,
            handler,
            Arc::clone(&self.interceptors),
            CallContext::new(),
        );
        invocation.proceed().await?;
        invocation
            .take_reply()
            .ok_or(RemoteError::MissingReply { operation })
    }
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

fn has_credentials(request: &RequestEnvelope) -> bool {
    request
        .credentials
        .as_ref()
        .is_some_and(|credentials| !credentials.user_name.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
