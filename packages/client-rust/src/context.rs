//! Execution-scoped ambient state for remote calls.
//!
//! A [`CallContext`] stands for one logical flow of execution. It carries the
//! authentication scope stack, the response-cache bypass depth and the
//! caller's culture. Clones share the same state; separately constructed
//! contexts are fully isolated from each other, so concurrent flows never see
//! each other's scopes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use relay_core::UserCredentialsProvider;

use crate::auth::{ScopeError, SessionPrincipal};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// One entry of the principal scope stack.
struct ScopeFrame {
    id: u64,
    principal: Arc<SessionPrincipal>,
}

#[derive(Default)]
struct ContextState {
    scopes: Mutex<Vec<ScopeFrame>>,
    bypass_depth: AtomicUsize,
    culture: RwLock<Option<String>>,
}

/// Cloneable handle to the ambient state of one execution flow.
#[derive(Clone, Default)]
pub struct CallContext {
    state: Arc<ContextState>,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with the given culture (e.g. `"fr-CA"`).
    #[must_use]
    pub fn with_culture(culture: impl Into<String>) -> Self {
        let ctx = Self::new();
        ctx.set_culture(Some(culture.into()));
        ctx
    }

    /// True when both handles refer to the same execution flow.
    #[must_use]
    pub fn same_flow(&self, other: &CallContext) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    // -- principal scope stack --

    /// Principal of the innermost active authentication scope.
    #[must_use]
    pub fn current_principal(&self) -> Option<Arc<SessionPrincipal>> {
        self.state
            .scopes
            .lock()
            .last()
            .map(|frame| Arc::clone(&frame.principal))
    }

    /// Number of active authentication scopes.
    #[must_use]
    pub fn scope_depth(&self) -> usize {
        self.state.scopes.lock().len()
    }

    pub(crate) fn push_principal(&self, principal: Arc<SessionPrincipal>) -> u64 {
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        self.state.scopes.lock().push(ScopeFrame { id, principal });
        id
    }

    /// Pops scope `id`, which must be the innermost one. On error the stack is
    /// left untouched.
    pub(crate) fn pop_principal(&self, id: u64) -> Result<(), ScopeError> {
        let mut scopes = self.state.scopes.lock();
        let innermost = scopes.last().map(|frame| frame.id);
        if innermost != Some(id) {
            return Err(ScopeError::OutOfOrder {
                scope_id: id,
                innermost,
            });
        }
        scopes.pop();
        Ok(())
    }

    // -- response cache bypass --

    /// Enters a cache bypass scope. While any bypass scope on this context is
    /// alive, response caching advice skips cache lookups (fresh replies are
    /// still stored). Scopes nest.
    #[must_use = "the bypass ends when the returned scope is dropped"]
    pub fn bypass_cache(&self) -> CacheBypassScope {
        self.state.bypass_depth.fetch_add(1, Ordering::SeqCst);
        CacheBypassScope { ctx: self.clone() }
    }

    #[must_use]
    pub fn is_cache_bypassed(&self) -> bool {
        self.state.bypass_depth.load(Ordering::SeqCst) > 0
    }

    // -- culture --

    #[must_use]
    pub fn culture(&self) -> Option<String> {
        self.state.culture.read().clone()
    }

    pub fn set_culture(&self, culture: Option<String>) {
        *self.state.culture.write() = culture;
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("scope_depth", &self.scope_depth())
            .field("cache_bypassed", &self.is_cache_bypassed())
            .field("culture", &self.culture())
            .finish()
    }
}

/// The ambient-principal credentials source: the innermost scope's user and
/// session token, or empty strings outside of any scope.
impl UserCredentialsProvider for CallContext {
    fn user_name(&self) -> String {
        self.current_principal()
            .map(|principal| principal.user_name().to_string())
            .unwrap_or_default()
    }

    fn session_token_id(&self) -> String {
        self.current_principal()
            .map(|principal| principal.session_token().id().to_string())
            .unwrap_or_default()
    }
}

/// RAII guard returned by [`CallContext::bypass_cache`].
pub struct CacheBypassScope {
    ctx: CallContext,
}

impl Drop for CacheBypassScope {
    fn drop(&mut self) {
        self.ctx.state.bypass_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_scopes_nest() {
        let ctx = CallContext::new();
        assert!(!ctx.is_cache_bypassed());
        {
            let _outer = ctx.bypass_cache();
            {
                let _inner = ctx.bypass_cache();
                assert!(ctx.is_cache_bypassed());
            }
            assert!(ctx.is_cache_bypassed());
        }
        assert!(!ctx.is_cache_bypassed());
    }

    #[test]
    fn bypass_is_per_flow() {
        let a = CallContext::new();
        let b = CallContext::new();
        let _scope = a.bypass_cache();
        assert!(a.is_cache_bypassed());
        assert!(a.clone().is_cache_bypassed());
        assert!(!b.is_cache_bypassed());
    }

    #[test]
    fn culture_round_trips() {
        let ctx = CallContext::with_culture("fr-CA");
        assert_eq!(ctx.culture().as_deref(), Some("fr-CA"));
        ctx.set_culture(None);
        assert!(ctx.culture().is_none());
    }

    #[test]
    fn clones_share_a_flow() {
        let ctx = CallContext::new();
        assert!(ctx.same_flow(&ctx.clone()));
        assert!(!ctx.same_flow(&CallContext::new()));
    }

    #[test]
    fn credentials_are_empty_outside_scopes() {
        let ctx = CallContext::new();
        assert_eq!(ctx.user_name(), "");
        assert_eq!(ctx.session_token_id(), "");
        assert!(ctx.pop_principal(42).is_err());
    }
}
