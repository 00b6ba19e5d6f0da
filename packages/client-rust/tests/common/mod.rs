//! Shared fixtures for the client ↔ loopback ↔ host integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use relay_client::auth::{
    authentication_contract, operations, InitiateSessionRequest, InitiateSessionResponse,
    ListAuthorityTokensRequest, TerminateSessionRequest,
};
use relay_client::{LoopbackConnector, OperationTable, RemoteServiceSettings, ServiceHost};
use relay_core::{ApplicationFault, ServiceContractDescriptor, ServiceRequest, SessionToken};
use serde::{Deserialize, Serialize};
use url::Url;

pub const PRIMARY: &str = "https://primary.example/";
pub const BACKUP: &str = "https://backup.example/";
pub const ORDERS: &str = "Relay.Orders";
pub const SECURE: &str = "Relay.Secure";

/// Fixed epoch for `ManualClock`s.
pub const START_MS: u64 = 1_700_000_000_000;

pub fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}

pub fn failover_settings() -> RemoteServiceSettings {
    RemoteServiceSettings::new(PRIMARY).with_failover(BACKUP)
}

pub fn orders_contract() -> Arc<ServiceContractDescriptor> {
    Arc::new(
        ServiceContractDescriptor::new(ORDERS)
            .with_authentication(false)
            .with_heartbeat("Ping"),
    )
}

pub fn secure_contract() -> Arc<ServiceContractDescriptor> {
    Arc::new(ServiceContractDescriptor::new(SECURE))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub sku: String,
}

impl ServiceRequest for QuoteRequest {
    fn cache_key(&self) -> Option<String> {
        Some(self.sku.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub sku: String,
    pub price: u64,
    pub served_by: String,
}

/// Counts the handler invocations a host actually ran.
#[derive(Debug, Default)]
pub struct HandlerCalls(AtomicUsize);

impl HandlerCalls {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Orders handler. `Quote` prices rise with every handler call so a cached
/// reply is distinguishable from a fresh one.
pub fn orders_handler(name: &'static str, calls: Arc<HandlerCalls>) -> OperationTable {
    let quotes = Arc::clone(&calls);
    let echoes = calls;
    OperationTable::new(orders_contract())
        .operation("Ping", |_ctx, _req: ()| async { Ok(()) })
        .operation("Echo", move |_ctx, text: String| {
            echoes.bump();
            async move { Ok(format!("{name}:{text}")) }
        })
        .operation("Quote", move |_ctx, req: QuoteRequest| {
            let price = 100 + quotes.bump() as u64;
            async move {
                Ok(Quote {
                    sku: req.sku,
                    price,
                    served_by: name.to_string(),
                })
            }
        })
        .operation("Reject", |_ctx, _req: ()| async {
            Err::<(), _>(ApplicationFault::new("OutOfStock", "no stock left").into())
        })
        .operation("Culture", |ctx, _req: ()| async move { Ok(ctx.culture()) })
}

pub fn orders_host(name: &'static str, calls: Arc<HandlerCalls>) -> Arc<ServiceHost> {
    let host = ServiceHost::new();
    host.register(Arc::new(orders_handler(name, calls)));
    Arc::new(host)
}

/// Authentication service state observed by tests.
#[derive(Debug, Default)]
pub struct AuthLedger {
    pub issued: AtomicUsize,
    pub terminated: Mutex<Vec<String>>,
}

/// Host serving the authentication contract plus `Relay.Secure`, which
/// requires an authenticated session. The only valid password is `"secret"`.
pub fn secure_host(ledger: Arc<AuthLedger>) -> Arc<ServiceHost> {
    let issued = Arc::clone(&ledger);
    let terminated = ledger;
    let auth = OperationTable::new(Arc::new(authentication_contract()))
        .operation(operations::INITIATE_SESSION, move |_ctx, req: InitiateSessionRequest| {
            let n = issued.issued.fetch_add(1, Ordering::SeqCst);
            async move {
                if req.password != "secret" {
                    return Err(ApplicationFault::new("InvalidPassword", "bad password").into());
                }
                Ok(InitiateSessionResponse {
                    session_token: SessionToken::new(
                        format!("{}-{n}", req.user_name),
                        chrono::Utc::now() + chrono::Duration::hours(1),
                    ),
                })
            }
        })
        .operation(operations::TERMINATE_SESSION, move |_ctx, req: TerminateSessionRequest| {
            terminated
                .terminated
                .lock()
                .push(req.session_token.id().to_string());
            async { Ok(()) }
        })
        .operation(
            operations::LIST_AUTHORITY_TOKENS,
            |_ctx, req: ListAuthorityTokensRequest| async move {
                Ok(vec![format!("{}.read", req.user_name)])
            },
        );
    let secure = OperationTable::new(secure_contract())
        .operation("Balance", |_ctx, _req: ()| async { Ok(42_u64) });

    let host = ServiceHost::new();
    host.register(Arc::new(auth));
    host.register(Arc::new(secure));
    Arc::new(host)
}

pub fn connector_with(hosts: &[(&str, Arc<ServiceHost>)]) -> Arc<LoopbackConnector> {
    let connector = LoopbackConnector::new();
    for (base, host) in hosts {
        connector.register(url(base), Arc::clone(host));
    }
    Arc::new(connector)
}
