//! Failover advice: retries transient failures on alternate endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::RemoteError;
use tracing::warn;

use super::{Channel, ChannelProvider};
use crate::intercept::{Interceptor, Invocation, InvocationKind};

/// Innermost client advice. On a transient failure it blacks out the failed
/// endpoint, re-issues the request directly on a failover channel and repeats
/// until a call succeeds or no endpoint is left, in which case the error of
/// the last attempt is returned. Application faults pass through untouched.
pub struct FailoverAdvice {
    provider: Arc<dyn ChannelProvider>,
}

impl FailoverAdvice {
    #[must_use]
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Interceptor<dyn Channel> for FailoverAdvice {
    async fn intercept(&self, invocation: &mut Invocation<dyn Channel>) -> Result<(), RemoteError> {
        if invocation.kind() == InvocationKind::Dispose {
            return invocation.proceed().await;
        }

        let mut last_error = match invocation.proceed().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };
        let original = Arc::clone(invocation.target());
        let mut failed = Arc::clone(&original);

        loop {
            warn!(
                endpoint = %failed.metadata().node_endpoint,
                contract = %invocation.contract().name(),
                operation = %invocation.operation(),
                request_id = %invocation.request().request_id,
                error = %last_error,
                "remote call failed; attempting failover"
            );

            let next = match self.provider.get_failover(failed.as_ref()).await {
                Ok(Some(next)) => next,
                Ok(None) => {
                    fall_back(invocation, &original, &failed);
                    return Err(last_error);
                }
                Err(err) => {
                    warn!(
                        endpoint = %failed.metadata().node_endpoint,
                        error = %err,
                        "resolving failover channel failed"
                    );
                    fall_back(invocation, &original, &failed);
                    return Err(last_error);
                }
            };
            if !same_channel(&failed, &original) {
                failed.abort();
            }
            invocation.retarget(Arc::clone(&next));

            match next.invoke(invocation.context(), invocation.request()).await {
                Ok(reply) => {
                    invocation.set_reply(reply);
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    last_error = err;
                    failed = next;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Points the invocation back at the channel it started on once failover has
/// given up, aborting the last failover channel tried.
fn fall_back(
    invocation: &mut Invocation<dyn Channel>,
    original: &Arc<dyn Channel>,
    failed: &Arc<dyn Channel>,
) {
    if !same_channel(failed, original) {
        failed.abort();
        invocation.retarget(Arc::clone(original));
    }
}

pub(crate) fn same_channel(a: &Arc<dyn Channel>, b: &Arc<dyn Channel>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
