//! Directive-driven response caching advice.
//!
//! One advice type serves both interception sites; a [`CachingStrategy`]
//! decides where the caching directive for a call comes from. On the client
//! it is read back from the reply headers, on the server it is looked up in a
//! [`DirectiveTable`](super::DirectiveTable).

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{CachingDirective, CachingSite, RemoteError, ReplyEnvelope};
use tracing::{debug, error, warn};

use super::{CacheProvider, DEFAULT_RESPONSE_CACHE};
use crate::channel::Channel;
use crate::intercept::{Interceptor, Invocation, InvocationKind, InvocationTarget};

/// Where the cache region and the caching directive of a call come from.
pub trait CachingStrategy<T: ?Sized + InvocationTarget>: Send + Sync {
    /// Cache region for the call. Defaults to `"<contract>.<operation>"`.
    fn region(&self, invocation: &Invocation<T>) -> String {
        invocation.default_region()
    }

    /// Directive for the completed call, or `None` when the reply must not be
    /// cached at this site. May annotate the reply.
    ///
    /// # Errors
    ///
    /// Returns an error when directive metadata is present but malformed.
    fn directive(&self, invocation: &mut Invocation<T>)
        -> Result<Option<CachingDirective>, RemoteError>;
}

/// Caches replies whose server-issued directive targets the client site.
#[derive(Debug, Default)]
pub struct ClientCachingStrategy;

impl CachingStrategy<dyn Channel> for ClientCachingStrategy {
    fn directive(
        &self,
        invocation: &mut Invocation<dyn Channel>,
    ) -> Result<Option<CachingDirective>, RemoteError> {
        let Some(reply) = invocation.reply() else {
            return Ok(None);
        };
        Ok(reply
            .caching_directive()?
            .filter(|directive| directive.site() == CachingSite::Client))
    }
}

/// Response cache advice.
///
/// Calls whose request declares a cache key are first looked up in the cache
/// (unless the context is in a bypass scope) and short-circuited on a hit.
/// After a real call, a cacheable directive stores the reply body for the
/// directive's time to live. A cacheable directive on a request without a
/// cache key fails the call with [`RemoteError::MissingCacheKey`]. Cache store
/// failures are logged and otherwise ignored.
pub struct ResponseCachingAdvice<S> {
    provider: Arc<dyn CacheProvider>,
    cache_id: String,
    strategy: S,
}

impl<S> ResponseCachingAdvice<S> {
    #[must_use]
    pub fn new(provider: Arc<dyn CacheProvider>, strategy: S) -> Self {
        Self::with_cache_id(provider, DEFAULT_RESPONSE_CACHE, strategy)
    }

    #[must_use]
    pub fn with_cache_id(
        provider: Arc<dyn CacheProvider>,
        cache_id: impl Into<String>,
        strategy: S,
    ) -> Self {
        Self {
            provider,
            cache_id: cache_id.into(),
            strategy,
        }
    }
}

#[async_trait]
impl<S, T> Interceptor<T> for ResponseCachingAdvice<S>
where
    S: CachingStrategy<T>,
    T: ?Sized + InvocationTarget,
{
    async fn intercept(&self, invocation: &mut Invocation<T>) -> Result<(), RemoteError> {
        if invocation.kind() != InvocationKind::Operation {
            return invocation.proceed().await;
        }

        let region = self.strategy.region(invocation);
        let cache_key = invocation.request().cache_key.clone();
        let cache = self.provider.create_client(&self.cache_id);

        if let Some(key) = cache_key.as_deref() {
            if invocation.context().is_cache_bypassed() {
                debug!(%region, %key, "cache bypass in effect; skipping lookup");
            } else {
                match cache.get(key, &region).await {
                    Ok(Some(body)) => {
                        debug!(%region, %key, "response cache hit");
                        invocation.set_reply(ReplyEnvelope::cached(body));
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%region, %key, error = %err, "response cache lookup failed"),
                }
            }
        }

        invocation.proceed().await?;

        if invocation.reply().is_some_and(ReplyEnvelope::is_cached) {
            return Ok(());
        }
        let Some(directive) = self.strategy.directive(invocation)? else {
            return Ok(());
        };
        if !directive.is_cacheable() {
            return Ok(());
        }
        let Some(key) = cache_key else {
            error!(
                %region,
                request_id = %invocation.request().request_id,
                "reply is cacheable but the request declares no cache key"
            );
            return Err(RemoteError::MissingCacheKey { region });
        };
        let Some(body) = invocation.reply().map(|reply| reply.body.clone()) else {
            return Ok(());
        };
        if let Err(err) = cache
            .put(&key, body, &region, directive.time_to_live())
            .await
        {
            warn!(%region, %key, error = %err, "storing response in cache failed");
        }
        Ok(())
    }
}
