//! Error taxonomy for remote calls.
//!
//! Every failure a caller can observe is a [`RemoteError`]. The variants fall
//! into four groups:
//!
//! - **Transient communication failures** (`Timeout`, `EndpointNotFound`,
//!   `Communication`): eligible for failover to an alternate endpoint.
//! - **Application faults** (`Fault`): business-rule rejections reported by
//!   the remote side. Never retried.
//! - **Known-offline fast-fail** (`Unreachable`): synthesized locally without
//!   touching the network.
//! - **Configuration / programmer errors** (`MissingCacheKey`,
//!   `ChannelClosed`, `UnknownOperation`, `MissingReply`, `Serialization`).

use serde::{Deserialize, Serialize};

/// A business-level fault reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApplicationFault {
    pub code: String,
    pub message: String,
}

impl ApplicationFault {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by remote calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("call to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
    #[error("no endpoint listening at {endpoint}")]
    EndpointNotFound { endpoint: String },
    #[error("communication failure with {endpoint}: {message}")]
    Communication { endpoint: String, message: String },
    #[error("application fault {0}")]
    Fault(#[from] ApplicationFault),
    #[error("service layer unreachable; call to {contract} not attempted")]
    Unreachable { contract: String },
    #[error("response for region {region} is cacheable but the request declares no cache key")]
    MissingCacheKey { region: String },
    #[error("channel to {endpoint} is closed")]
    ChannelClosed { endpoint: String },
    #[error("unknown operation {contract}.{operation}")]
    UnknownOperation { contract: String, operation: String },
    #[error("invocation of {operation} completed without a reply")]
    MissingReply { operation: String },
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RemoteError {
    /// True for timeout and connectivity failures, the only errors that may
    /// trigger failover to another endpoint.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::EndpointNotFound { .. } | Self::Communication { .. }
        )
    }

    /// True for the "endpoint not found" class of failure that flips the
    /// online monitor to offline.
    #[must_use]
    pub fn is_endpoint_not_found(&self) -> bool {
        matches!(self, Self::EndpointNotFound { .. })
    }

    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
