//! Gating advice: fail fast while the remote tier is known unreachable.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::RemoteError;
use tracing::debug;

use super::OnlineMonitor;
use crate::channel::Channel;
use crate::intercept::{Interceptor, Invocation, InvocationKind};

/// Rejects non-probe calls with [`RemoteError::Unreachable`] while the monitor
/// reports `Offline`, without touching the network. Every call that does go
/// out updates the monitor: success marks the tier online, an
/// endpoint-not-found failure marks it offline. Heartbeat probes always go
/// out.
pub struct GatingAdvice {
    monitor: Arc<OnlineMonitor>,
}

impl GatingAdvice {
    #[must_use]
    pub fn new(monitor: Arc<OnlineMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl Interceptor<dyn Channel> for GatingAdvice {
    async fn intercept(&self, invocation: &mut Invocation<dyn Channel>) -> Result<(), RemoteError> {
        if invocation.kind() == InvocationKind::Dispose {
            return invocation.proceed().await;
        }

        if !invocation.is_probe() && !self.monitor.is_online() {
            debug!(
                contract = %invocation.contract().name(),
                operation = %invocation.operation(),
                "remote tier offline; failing fast"
            );
            return Err(RemoteError::Unreachable {
                contract: invocation.contract().name().to_string(),
            });
        }

        let result = invocation.proceed().await;
        match &result {
            Ok(()) => self.monitor.record_success(),
            Err(err) if err.is_endpoint_not_found() => self.monitor.record_unreachable(),
            Err(_) => {}
        }
        result
    }
}
