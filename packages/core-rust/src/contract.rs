//! Service contract descriptors.
//!
//! A [`ServiceContractDescriptor`] identifies a group of remote operations.
//! Descriptors are produced by the service-definition layer and treated as
//! immutable by the runtime: they decide whether outbound channels carry
//! credentials, which transfer mode the binding should use, and which
//! operation (if any) acts as the lightweight heartbeat probe.

use serde::{Deserialize, Serialize};

/// Transfer mode hint for the transport binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferMode {
    /// Request and reply are fully buffered.
    #[default]
    Buffered,
    /// Both directions are streamed.
    Streamed,
    /// Only the request is streamed.
    StreamedRequest,
    /// Only the reply is streamed.
    StreamedResponse,
}

/// Identity and attributes of a remote operation group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceContractDescriptor {
    name: String,
    requires_authentication: bool,
    transfer_mode: TransferMode,
    heartbeat_operation: Option<String>,
}

impl ServiceContractDescriptor {
    /// Creates a descriptor for the contract with the given fully-qualified
    /// name. Authentication is required by default.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_authentication: true,
            transfer_mode: TransferMode::Buffered,
            heartbeat_operation: None,
        }
    }

    #[must_use]
    pub fn with_authentication(mut self, required: bool) -> Self {
        self.requires_authentication = required;
        self
    }

    #[must_use]
    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    /// Marks `operation` as the heartbeat probe of this contract.
    #[must_use]
    pub fn with_heartbeat(mut self, operation: impl Into<String>) -> Self {
        self.heartbeat_operation = Some(operation.into());
        self
    }

    /// Fully-qualified contract name (e.g. `"Acme.Orders.IOrderService"`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn requires_authentication(&self) -> bool {
        self.requires_authentication
    }

    #[must_use]
    pub fn transfer_mode(&self) -> TransferMode {
        self.transfer_mode
    }

    #[must_use]
    pub fn heartbeat_operation(&self) -> Option<&str> {
        self.heartbeat_operation.as_deref()
    }

    /// Default cache region for an operation of this contract:
    /// `"<contract>.<operation>"`.
    #[must_use]
    pub fn region_for(&self, operation: &str) -> String {
        format!("{}.{}", self.name, operation)
    }
}
