//! Per-call tracing span and metrics.
//!
//! [`CallTracingAdvice`] is not part of the built-in pipeline; hosts plug it in
//! through an [`AdditionalInterceptorProvider`](super::AdditionalInterceptorProvider)
//! on either site.

use std::time::Instant;

use async_trait::async_trait;
use relay_core::RemoteError;
use tracing::{info_span, Instrument};

use super::{Interceptor, Invocation, InvocationKind, InvocationTarget};

/// Counter of completed calls, labelled by contract, operation and outcome.
pub const CALLS_TOTAL: &str = "relay_client_calls_total";
/// Histogram of call durations in milliseconds.
pub const CALL_DURATION_MS: &str = "relay_client_call_duration_ms";

/// Wraps every operation in an `info` span carrying `duration_ms` and
/// `outcome`, and records the call in the `metrics` registry.
#[derive(Debug, Clone)]
pub struct CallTracingAdvice {
    site: &'static str,
}

impl CallTracingAdvice {
    #[must_use]
    pub fn client() -> Self {
        Self { site: "client" }
    }

    #[must_use]
    pub fn server() -> Self {
        Self { site: "server" }
    }
}

fn outcome(result: &Result<(), RemoteError>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(err) if err.is_fault() => "fault",
        Err(err) if err.is_unreachable() => "unreachable",
        Err(err) if err.is_transient() => "transient",
        Err(_) => "error",
    }
}

#[async_trait]
impl<T: ?Sized + InvocationTarget> Interceptor<T> for CallTracingAdvice {
    async fn intercept(&self, invocation: &mut Invocation<T>) -> Result<(), RemoteError> {
        if invocation.kind() == InvocationKind::Dispose {
            return invocation.proceed().await;
        }

        let contract = invocation.contract().name().to_string();
        let operation = invocation.operation().to_string();
        let span = info_span!(
            "remote_call",
            site = self.site,
            contract = %contract,
            operation = %operation,
            request_id = %invocation.request().request_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let start = Instant::now();
        let result = invocation.proceed().instrument(span.clone()).await;
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = outcome(&result);

        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome);
        span.in_scope(|| tracing::info!(duration_ms, outcome, "remote call complete"));

        metrics::counter!(
            CALLS_TOTAL,
            "site" => self.site,
            "contract" => contract.clone(),
            "operation" => operation.clone(),
            "outcome" => outcome
        )
        .increment(1);
        #[allow(clippy::cast_precision_loss)]
        let duration = duration_ms as f64;
        metrics::histogram!(
            CALL_DURATION_MS,
            "site" => self.site,
            "contract" => contract,
            "operation" => operation
        )
        .record(duration);

        result
    }
}
