//! Server-side caching directives.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{CachingDirective, CachingSite, RemoteError};

use super::advice::CachingStrategy;
use crate::host::ServiceHandler;
use crate::intercept::Invocation;

/// Per-operation caching directives, keyed by contract and operation name.
#[derive(Debug, Clone, Default)]
pub struct DirectiveTable {
    directives: HashMap<(String, String), CachingDirective>,
}

impl DirectiveTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(
        mut self,
        contract: impl Into<String>,
        operation: impl Into<String>,
        directive: CachingDirective,
    ) -> Self {
        self.insert(contract, operation, directive);
        self
    }

    pub fn insert(
        &mut self,
        contract: impl Into<String>,
        operation: impl Into<String>,
        directive: CachingDirective,
    ) {
        self.directives
            .insert((contract.into(), operation.into()), directive);
    }

    #[must_use]
    pub fn get(&self, contract: &str, operation: &str) -> Option<&CachingDirective> {
        self.directives
            .get(&(contract.to_string(), operation.to_string()))
    }
}

/// Server site strategy: `Server`-site directives cache on the host,
/// `Client`-site directives are attached to the reply headers for the
/// caller's advice and never cached here.
#[derive(Debug, Clone)]
pub struct ServerCachingStrategy {
    table: Arc<DirectiveTable>,
}

impl ServerCachingStrategy {
    #[must_use]
    pub fn new(table: Arc<DirectiveTable>) -> Self {
        Self { table }
    }
}

impl CachingStrategy<dyn ServiceHandler> for ServerCachingStrategy {
    fn directive(
        &self,
        invocation: &mut Invocation<dyn ServiceHandler>,
    ) -> Result<Option<CachingDirective>, RemoteError> {
        let Some(directive) = self
            .table
            .get(invocation.contract().name(), invocation.operation())
            .cloned()
        else {
            return Ok(None);
        };
        match directive.site() {
            CachingSite::Server => Ok(Some(directive)),
            CachingSite::Client => {
                if let Some(reply) = invocation.reply_mut() {
                    reply.set_caching_directive(&directive)?;
                }
                Ok(None)
            }
            CachingSite::None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use relay_core::{RequestEnvelope, ServiceContractDescriptor, ServiceRequest};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::cache::MemoryCacheProvider;
    use crate::host::{OperationTable, ServiceHost};
    use crate::intercept::ServerPipeline;

    #[derive(Serialize, Deserialize)]
    struct Quote {
        symbol: String,
    }

    impl ServiceRequest for Quote {
        fn cache_key(&self) -> Option<String> {
            Some(self.symbol.clone())
        }
    }

    fn host(site: CachingSite, calls: Arc<AtomicUsize>) -> ServiceHost {
        let contract = Arc::new(
            ServiceContractDescriptor::new("Relay.Quotes").with_authentication(false),
        );
        let table = DirectiveTable::new().with(
            "Relay.Quotes",
            "Get",
            CachingDirective::new(true, Duration::from_secs(30), site),
        );
        let pipeline = ServerPipeline::default().with_cache(
            Arc::new(MemoryCacheProvider::new()),
            Arc::new(table),
        );
        let host = ServiceHost::with_pipeline(&pipeline);
        host.register(Arc::new(OperationTable::new(contract).operation(
            "Get",
            move |_ctx, req: Quote| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("{}@{n}", req.symbol))
                }
            },
        )));
        host
    }

    fn get(symbol: &str) -> RequestEnvelope {
        RequestEnvelope::new(
            "Relay.Quotes",
            "Get",
            &Quote {
                symbol: symbol.to_string(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn server_site_directive_caches_on_the_host() {
        let calls = Arc::new(AtomicUsize::new(0));
        let host = host(CachingSite::Server, calls.clone());

        let first = host.dispatch(get("ACME")).await.unwrap();
        let second = host.dispatch(get("ACME")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.body, second.body);
        assert!(first.caching_directive().unwrap().is_none());
    }

    #[tokio::test]
    async fn client_site_directive_is_attached_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let host = host(CachingSite::Client, calls.clone());

        let reply = host.dispatch(get("ACME")).await.unwrap();
        host.dispatch(get("ACME")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let directive = reply.caching_directive().unwrap().unwrap();
        assert_eq!(directive.site(), CachingSite::Client);
        assert_eq!(directive.time_to_live(), Duration::from_secs(30));
    }

    #[test]
    fn table_lookup_is_per_operation() {
        let table = DirectiveTable::new().with(
            "Relay.Quotes",
            "Get",
            CachingDirective::new(true, Duration::from_secs(1), CachingSite::Client),
        );
        assert!(table.get("Relay.Quotes", "Get").is_some());
        assert!(table.get("Relay.Quotes", "List").is_none());
        assert!(table.get("Relay.Other", "Get").is_none());
    }
}
