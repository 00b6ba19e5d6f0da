//! Disposal guard: the outermost client advice.

use async_trait::async_trait;
use relay_core::RemoteError;
use tracing::warn;

use super::{Interceptor, Invocation, InvocationKind};
use crate::channel::{Channel, ChannelState};

/// Completes `Dispose` invocations by releasing the channel without ever
/// proceeding down the chain. An open channel is closed gracefully (aborted if
/// the close fails); a faulted one is aborted. Other invocations pass through.
#[derive(Debug, Default)]
pub struct DisposalGuard;

#[async_trait]
impl Interceptor<dyn Channel> for DisposalGuard {
    async fn intercept(&self, invocation: &mut Invocation<dyn Channel>) -> Result<(), RemoteError> {
        if invocation.kind() != InvocationKind::Dispose {
            return invocation.proceed().await;
        }

        let channel = invocation.target();
        match channel.state() {
            ChannelState::Closed => {}
            ChannelState::Faulted => channel.abort(),
            ChannelState::Created | ChannelState::Opened => {
                if let Err(err) = channel.close().await {
                    warn!(
                        endpoint = %channel.metadata().service_endpoint,
                        error = %err,
                        "closing channel failed; aborting"
                    );
                    channel.abort();
                }
            }
        }
        Ok(())
    }
}
