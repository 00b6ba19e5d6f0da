//! Authentication sessions and the principal scope stack.
//!
//! [`AuthenticationService`] is the remote authentication contract.
//! [`AuthenticationScope`] binds a [`CallContext`](crate::context::CallContext)
//! to a session for its lifetime, and [`SessionPrincipal`] is the identity the
//! scope establishes.

pub mod principal;
pub mod scope;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{RemoteError, ServiceContractDescriptor, ServiceRequest, SessionToken};
use serde::{Deserialize, Serialize};

use crate::client::RemoteClient;
use crate::context::CallContext;

pub use principal::SessionPrincipal;
pub use scope::{AuthenticationScope, ScopeError};

/// Contract name of the authentication service.
pub const AUTHENTICATION_CONTRACT: &str = "Relay.Authentication";

/// Operation names of the authentication contract.
pub mod operations {
    pub const INITIATE_SESSION: &str = "InitiateSession";
    pub const TERMINATE_SESSION: &str = "TerminateSession";
    pub const LIST_AUTHORITY_TOKENS: &str = "ListAuthorityTokensForUser";
}

/// Descriptor of the authentication contract. Calls to it are anonymous.
#[must_use]
pub fn authentication_contract() -> ServiceContractDescriptor {
    ServiceContractDescriptor::new(AUTHENTICATION_CONTRACT).with_authentication(false)
}

#[derive(Clone, Serialize, Deserialize)]
pub struct InitiateSessionRequest {
    pub user_name: String,
    pub application_name: String,
    pub host_name: String,
    pub password: String,
}

impl InitiateSessionRequest {
    #[must_use]
    pub fn new(
        user_name: impl Into<String>,
        application_name: impl Into<String>,
        host_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            application_name: application_name.into(),
            host_name: host_name.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for InitiateSessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitiateSessionRequest")
            .field("user_name", &self.user_name)
            .field("application_name", &self.application_name)
            .field("host_name", &self.host_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ServiceRequest for InitiateSessionRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateSessionResponse {
    pub session_token: SessionToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateSessionRequest {
    pub user_name: String,
    pub session_token: SessionToken,
}

impl ServiceRequest for TerminateSessionRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAuthorityTokensRequest {
    pub user_name: String,
}

/// Authority tokens only change with role membership, so they are cached per
/// user when the server issues a directive for them.
impl ServiceRequest for ListAuthorityTokensRequest {
    fn cache_key(&self) -> Option<String> {
        Some(self.user_name.clone())
    }
}

/// Remote authentication contract.
#[async_trait]
pub trait AuthenticationService: Send + Sync {
    async fn initiate_session(
        &self,
        request: InitiateSessionRequest,
    ) -> Result<InitiateSessionResponse, RemoteError>;

    async fn terminate_session(&self, request: TerminateSessionRequest) -> Result<(), RemoteError>;

    async fn list_authority_tokens(&self, user_name: &str) -> Result<Vec<String>, RemoteError>;
}

/// [`AuthenticationService`] over a [`RemoteClient`] for the authentication
/// contract.
pub struct RemoteAuthenticationService {
    client: Arc<RemoteClient>,
    context: CallContext,
}

impl RemoteAuthenticationService {
    #[must_use]
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            context: CallContext::new(),
        }
    }
}

#[async_trait]
impl AuthenticationService for RemoteAuthenticationService {
    async fn initiate_session(
        &self,
        request: InitiateSessionRequest,
    ) -> Result<InitiateSessionResponse, RemoteError> {
        self.client
            .invoke(&self.context, operations::INITIATE_SESSION, &request)
            .await
    }

    async fn terminate_session(&self, request: TerminateSessionRequest) -> Result<(), RemoteError> {
        self.client
            .invoke(&self.context, operations::TERMINATE_SESSION, &request)
            .await
    }

    async fn list_authority_tokens(&self, user_name: &str) -> Result<Vec<String>, RemoteError> {
        let request = ListAuthorityTokensRequest {
            user_name: user_name.to_string(),
        };
        self.client
            .invoke(&self.context, operations::LIST_AUTHORITY_TOKENS, &request)
            .await
    }
}
