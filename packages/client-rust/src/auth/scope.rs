//! Stack-disciplined authentication scopes.

use std::sync::Arc;

use relay_core::RemoteError;
use thiserror::Error;
use tracing::{error, warn};

use super::{AuthenticationService, InitiateSessionRequest, SessionPrincipal, TerminateSessionRequest};
use crate::context::CallContext;

/// Misuse of the scope stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("authentication scope {scope_id} ended out of order (innermost scope: {innermost:?})")]
    OutOfOrder {
        scope_id: u64,
        innermost: Option<u64>,
    },

    #[error("authentication scope {scope_id} has already ended")]
    AlreadyEnded { scope_id: u64 },
}

/// Binds a [`CallContext`] to an authenticated session.
///
/// `begin` initiates a session and pushes its principal onto the context's
/// scope stack; `end` pops it, restoring the previous principal, then
/// terminates the session on a best-effort basis. Scopes on one context must
/// end in LIFO order. Ending any other scope is reported as
/// [`ScopeError::OutOfOrder`] and leaves the stack as it was.
///
/// A scope dropped without `end` is popped if it is innermost (with session
/// termination spawned in the background); otherwise the violation is logged
/// and the stack is left alone.
pub struct AuthenticationScope {
    id: u64,
    context: CallContext,
    principal: Arc<SessionPrincipal>,
    previous: Option<Arc<SessionPrincipal>>,
    service: Arc<dyn AuthenticationService>,
    ended: bool,
}

impl AuthenticationScope {
    /// Initiates a session for `request.user_name` and makes its principal
    /// current on `context`.
    ///
    /// # Errors
    ///
    /// Returns the session initiation error; the context is unchanged.
    pub async fn begin(
        context: &CallContext,
        service: Arc<dyn AuthenticationService>,
        request: InitiateSessionRequest,
    ) -> Result<Self, RemoteError> {
        let user_name = request.user_name.clone();
        let response = service.initiate_session(request).await?;
        let principal = Arc::new(SessionPrincipal::new(
            user_name,
            response.session_token,
            Arc::clone(&service),
        ));
        let previous = context.current_principal();
        let id = context.push_principal(Arc::clone(&principal));
        Ok(Self {
            id,
            context: context.clone(),
            principal,
            previous,
            service,
            ended: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn principal(&self) -> &Arc<SessionPrincipal> {
        &self.principal
    }

    /// Principal that was current when the scope began.
    #[must_use]
    pub fn previous_principal(&self) -> Option<&Arc<SessionPrincipal>> {
        self.previous.as_ref()
    }

    /// Ends the scope.
    ///
    /// # Errors
    ///
    /// `OutOfOrder` if this is not the innermost scope of its context (the
    /// scope stays active and may be ended later), `AlreadyEnded` on a second
    /// call. Session termination failures are logged, not returned.
    pub async fn end(&mut self) -> Result<(), ScopeError> {
        if self.ended {
            return Err(ScopeError::AlreadyEnded { scope_id: self.id });
        }
        self.context.pop_principal(self.id)?;
        self.ended = true;

        if let Err(err) = self.service.terminate_session(self.termination()).await {
            warn!(
                user = %self.principal.user_name(),
                error = %err,
                "terminating session failed"
            );
        }
        Ok(())
    }

    fn termination(&self) -> TerminateSessionRequest {
        TerminateSessionRequest {
            user_name: self.principal.user_name().to_string(),
            session_token: self.principal.session_token().clone(),
        }
    }
}

impl Drop for AuthenticationScope {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(err) = self.context.pop_principal(self.id) {
            error!(error = %err, "authentication scope dropped out of order");
            return;
        }
        self.ended = true;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                user = %self.principal.user_name(),
                "authentication scope dropped outside a runtime; session left to expire"
            );
            return;
        };
        let service = Arc::clone(&self.service);
        let request = self.termination();
        runtime.spawn(async move {
            if let Err(err) = service.terminate_session(request).await {
                warn!(error = %err, "terminating session failed");
            }
        });
    }
}

impl std::fmt::Debug for AuthenticationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationScope")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::testing::FakeAuthentication;

    fn login(user: &str) -> InitiateSessionRequest {
        InitiateSessionRequest::new(user, "relay-tests", "localhost", "secret")
    }

    fn service() -> Arc<FakeAuthentication> {
        Arc::new(FakeAuthentication::default())
    }

    #[tokio::test]
    async fn nested_scopes_restore_previous_principal() {
        let auth = service();
        let ctx = CallContext::new();
        assert!(ctx.current_principal().is_none());

        let mut outer = AuthenticationScope::begin(&ctx, auth.clone(), login("alice")).await.unwrap();
        assert_eq!(ctx.current_principal().unwrap().user_name(), "alice");

        let mut inner = AuthenticationScope::begin(&ctx, auth.clone(), login("bob")).await.unwrap();
        assert_eq!(ctx.current_principal().unwrap().user_name(), "bob");
        assert_eq!(inner.previous_principal().unwrap().user_name(), "alice");

        inner.end().await.unwrap();
        assert_eq!(ctx.current_principal().unwrap().user_name(), "alice");
        outer.end().await.unwrap();
        assert!(ctx.current_principal().is_none());

        assert_eq!(*auth.terminated.lock(), vec!["bob-1", "alice-0"]);
    }

    #[tokio::test]
    async fn out_of_order_end_is_reported_and_harmless() {
        let auth = service();
        let ctx = CallContext::new();
        let mut outer = AuthenticationScope::begin(&ctx, auth.clone(), login("alice")).await.unwrap();
        let mut inner = AuthenticationScope::begin(&ctx, auth.clone(), login("bob")).await.unwrap();

        let err = outer.end().await.unwrap_err();
        assert_eq!(
            err,
            ScopeError::OutOfOrder {
                scope_id: outer.id(),
                innermost: Some(inner.id()),
            }
        );
        assert_eq!(ctx.scope_depth(), 2);
        assert_eq!(ctx.current_principal().unwrap().user_name(), "bob");
        assert!(auth.terminated.lock().is_empty());

        inner.end().await.unwrap();
        outer.end().await.unwrap();
        assert_eq!(ctx.scope_depth(), 0);
    }

    #[tokio::test]
    async fn ending_twice_is_an_error() {
        let ctx = CallContext::new();
        let mut scope = AuthenticationScope::begin(&ctx, service(), login("alice")).await.unwrap();
        scope.end().await.unwrap();
        assert_eq!(
            scope.end().await.unwrap_err(),
            ScopeError::AlreadyEnded { scope_id: scope.id() }
        );
    }

    #[tokio::test]
    async fn termination_failure_still_restores_principal() {
        let auth = Arc::new(FakeAuthentication {
            fail_terminate: true,
            ..FakeAuthentication::default()
        });
        let ctx = CallContext::new();
        let mut scope = AuthenticationScope::begin(&ctx, auth, login("alice")).await.unwrap();
        scope.end().await.unwrap();
        assert!(ctx.current_principal().is_none());
    }

    #[tokio::test]
    async fn failed_login_leaves_context_untouched() {
        let ctx = CallContext::new();
        let request = InitiateSessionRequest::new("alice", "relay-tests", "localhost", "wrong");
        let err = AuthenticationScope::begin(&ctx, service(), request).await.unwrap_err();
        assert!(err.is_fault());
        assert_eq!(ctx.scope_depth(), 0);
    }

    #[tokio::test]
    async fn dropped_innermost_scope_is_unwound() {
        let auth = service();
        let ctx = CallContext::new();
        {
            let _scope = AuthenticationScope::begin(&ctx, auth.clone(), login("alice")).await.unwrap();
            assert_eq!(ctx.scope_depth(), 1);
        }
        assert_eq!(ctx.scope_depth(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*auth.terminated.lock(), vec!["alice-0"]);
    }

    #[tokio::test]
    async fn dropped_outer_scope_leaves_stack_intact() {
        let auth = service();
        let ctx = CallContext::new();
        let outer = AuthenticationScope::begin(&ctx, auth.clone(), login("alice")).await.unwrap();
        let mut inner = AuthenticationScope::begin(&ctx, auth.clone(), login("bob")).await.unwrap();

        drop(outer);
        assert_eq!(ctx.scope_depth(), 2);
        assert_eq!(ctx.current_principal().unwrap().user_name(), "bob");

        inner.end().await.unwrap();
        assert_eq!(ctx.current_principal().unwrap().user_name(), "alice");
    }

    #[tokio::test]
    async fn contexts_do_not_share_scope_stacks() {
        let auth = service();
        let a = CallContext::new();
        let b = CallContext::new();
        let mut scope_a = AuthenticationScope::begin(&a, auth.clone(), login("alice")).await.unwrap();
        let mut scope_b = AuthenticationScope::begin(&b, auth.clone(), login("bob")).await.unwrap();

        // Ending b's scope through a's stack order is irrelevant: each context
        // has its own innermost scope.
        scope_a.end().await.unwrap();
        assert_eq!(b.current_principal().unwrap().user_name(), "bob");
        scope_b.end().await.unwrap();
    }
}
