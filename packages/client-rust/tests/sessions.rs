//! Authentication scopes, ambient credentials and culture propagation.

mod common;

use std::sync::Arc;

use common::*;
use relay_client::auth::{
    authentication_contract, AuthenticationService, InitiateSessionRequest, ScopeError,
};
use relay_client::{
    AuthenticationScope, CallContext, RemoteAuthenticationService, RemoteServiceProvider,
};
use relay_core::{ManualClock, RemoteError};

struct Fixture {
    services: RemoteServiceProvider,
    auth: Arc<dyn AuthenticationService>,
    ledger: Arc<AuthLedger>,
}

async fn fixture() -> Fixture {
    let ledger = Arc::new(AuthLedger::default());
    let connector = connector_with(&[(PRIMARY, secure_host(Arc::clone(&ledger)))]);
    let services = RemoteServiceProvider::builder(
        relay_client::RemoteServiceSettings::new(PRIMARY),
        connector,
    )
    .clock(Arc::new(ManualClock::new(START_MS)))
    .build()
    .unwrap();
    let auth_client = services
        .get_service(&CallContext::new(), Arc::new(authentication_contract()))
        .await
        .unwrap();
    Fixture {
        auth: Arc::new(RemoteAuthenticationService::new(Arc::new(auth_client))),
        services,
        ledger,
    }
}

fn login(user: &str) -> InitiateSessionRequest {
    InitiateSessionRequest::new(user, "relay-tests", "localhost", "secret")
}

#[tokio::test]
async fn anonymous_calls_to_authenticated_contracts_are_rejected() {
    let f = fixture().await;
    let ctx = CallContext::new();
    let client = f.services.get_service(&ctx, secure_contract()).await.unwrap();

    let err = client.invoke::<_, u64>(&ctx, "Balance", &()).await.unwrap_err();
    match err {
        RemoteError::Fault(fault) => {
            assert_eq!(fault.code, relay_client::host::AUTHENTICATION_REQUIRED);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn scope_principal_supplies_channel_credentials() {
    let f = fixture().await;
    let ctx = CallContext::new();
    let mut scope = AuthenticationScope::begin(&ctx, Arc::clone(&f.auth), login("alice"))
        .await
        .unwrap();

    let client = f.services.get_service(&ctx, secure_contract()).await.unwrap();
    let credentials = client.channel().metadata().credentials.clone().unwrap();
    assert_eq!(credentials.user_name, "alice");
    assert_eq!(credentials.password, scope.principal().session_token().id());

    let balance: u64 = client.invoke(&ctx, "Balance", &()).await.unwrap();
    assert_eq!(balance, 42);
    assert!(scope.principal().has_authority("alice.read").await.unwrap());

    scope.end().await.unwrap();
    assert!(ctx.current_principal().is_none());
    assert_eq!(
        *f.ledger.terminated.lock(),
        vec![scope.principal().session_token().id().to_string()]
    );
}

#[tokio::test]
async fn failed_login_leaves_the_context_untouched() {
    let f = fixture().await;
    let ctx = CallContext::new();
    let request = InitiateSessionRequest::new("mallory", "relay-tests", "localhost", "guess");

    let err = AuthenticationScope::begin(&ctx, Arc::clone(&f.auth), request)
        .await
        .err()
        .unwrap();
    assert!(err.is_fault());
    assert_eq!(ctx.scope_depth(), 0);
}

#[tokio::test]
async fn nested_scopes_unwind_in_lifo_order() {
    let f = fixture().await;
    let ctx = CallContext::new();
    let mut outer = AuthenticationScope::begin(&ctx, Arc::clone(&f.auth), login("alice"))
        .await
        .unwrap();
    let mut inner = AuthenticationScope::begin(&ctx, Arc::clone(&f.auth), login("bob"))
        .await
        .unwrap();
    assert_eq!(ctx.current_principal().unwrap().user_name(), "bob");
    assert_eq!(inner.previous_principal().unwrap().user_name(), "alice");

    let err = outer.end().await.unwrap_err();
    assert!(matches!(err, ScopeError::OutOfOrder { .. }));
    assert_eq!(ctx.scope_depth(), 2);

    inner.end().await.unwrap();
    assert_eq!(ctx.current_principal().unwrap().user_name(), "alice");
    outer.end().await.unwrap();
    assert_eq!(ctx.scope_depth(), 0);
    assert_eq!(f.ledger.terminated.lock().len(), 2);
}

#[tokio::test]
async fn concurrent_flows_keep_separate_principals() {
    let f = Arc::new(fixture().await);

    let tasks: Vec<_> = ["alice", "bob", "carol", "dave"]
        .into_iter()
        .map(|user| {
            let f = Arc::clone(&f);
            tokio::spawn(async move {
                let ctx = CallContext::new();
                let mut scope = AuthenticationScope::begin(&ctx, Arc::clone(&f.auth), login(user))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
                let client = f.services.get_service(&ctx, secure_contract()).await.unwrap();
                let seen = client.channel().metadata().credentials.clone().unwrap().user_name;
                scope.end().await.unwrap();
                (user, seen, ctx.scope_depth())
            })
        })
        .collect();

    for task in tasks {
        let (user, seen, depth) = task.await.unwrap();
        assert_eq!(user, seen);
        assert_eq!(depth, 0);
    }
    assert_eq!(f.ledger.terminated.lock().len(), 4);
}

#[tokio::test]
async fn cloned_context_shares_the_scope_stack_across_tasks() {
    let f = fixture().await;
    let ctx = CallContext::new();
    let mut scope = AuthenticationScope::begin(&ctx, Arc::clone(&f.auth), login("alice"))
        .await
        .unwrap();

    let child = ctx.clone();
    let seen = tokio::spawn(async move {
        child
            .current_principal()
            .map(|principal| principal.user_name().to_string())
    })
    .await
    .unwrap();
    assert_eq!(seen.as_deref(), Some("alice"));

    scope.end().await.unwrap();
}

#[tokio::test]
async fn caller_culture_reaches_the_handler() {
    let connector = connector_with(&[(
        PRIMARY,
        orders_host("primary", Arc::new(HandlerCalls::default())),
    )]);
    let services = RemoteServiceProvider::builder(
        relay_client::RemoteServiceSettings::new(PRIMARY),
        connector,
    )
    .build()
    .unwrap();

    let ctx = CallContext::with_culture("fr-CA");
    let client = services.get_service(&ctx, orders_contract()).await.unwrap();
    let culture: Option<String> = client.invoke(&ctx, "Culture", &()).await.unwrap();
    assert_eq!(culture.as_deref(), Some("fr-CA"));

    let plain = CallContext::new();
    let culture: Option<String> = client.invoke(&plain, "Culture", &()).await.unwrap();
    assert_eq!(culture, None);
}

#[tokio::test]
async fn closed_clients_reject_further_calls() {
    let connector = connector_with(&[(
        PRIMARY,
        orders_host("primary", Arc::new(HandlerCalls::default())),
    )]);
    let services = RemoteServiceProvider::builder(
        relay_client::RemoteServiceSettings::new(PRIMARY),
        Arc::clone(&connector) as Arc<dyn relay_client::ChannelConnector>,
    )
    .build()
    .unwrap();
    let ctx = CallContext::new();
    let client = services.get_service(&ctx, orders_contract()).await.unwrap();

    let _: String = client.invoke(&ctx, "Echo", "x").await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();
    assert!(client.is_closed());
    assert_eq!(client.channel().state(), relay_client::ChannelState::Closed);

    let err = client.invoke::<_, String>(&ctx, "Echo", "y").await.unwrap_err();
    assert!(matches!(err, RemoteError::ChannelClosed { .. }));
    assert_eq!(connector.request_count(), 1);
}
