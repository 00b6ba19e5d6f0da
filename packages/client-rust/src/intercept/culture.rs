//! Culture propagation between client and server contexts.

use async_trait::async_trait;
use relay_core::{headers, RemoteError};

use super::{Interceptor, Invocation};
use crate::channel::Channel;
use crate::host::ServiceHandler;

/// Stamps the caller's culture onto outbound requests.
#[derive(Debug, Default)]
pub struct CultureClientAdvice;

#[async_trait]
impl Interceptor<dyn Channel> for CultureClientAdvice {
    async fn intercept(&self, invocation: &mut Invocation<dyn Channel>) -> Result<(), RemoteError> {
        if let Some(culture) = invocation.context().culture() {
            invocation.request_mut().set_header(headers::CULTURE, culture);
        }
        invocation.proceed().await
    }
}

/// Adopts the culture carried by an inbound request for the server-side
/// context of the call.
#[derive(Debug, Default)]
pub struct CultureServerAdvice;

#[async_trait]
impl Interceptor<dyn ServiceHandler> for CultureServerAdvice {
    async fn intercept(
        &self,
        invocation: &mut Invocation<dyn ServiceHandler>,
    ) -> Result<(), RemoteError> {
        if let Some(culture) = invocation.request().header(headers::CULTURE) {
            invocation.context().set_culture(Some(culture.to_string()));
        }
        invocation.proceed().await
    }
}
