//! Interception pipeline and the general-purpose advices.

pub mod culture;
pub mod disposal;
pub mod invocation;
pub mod pipeline;
pub mod timing;

pub use culture::{CultureClientAdvice, CultureServerAdvice};
pub use disposal::DisposalGuard;
pub use invocation::{
    Interceptor, InterceptorList, Invocation, InvocationKind, InvocationTarget, ProceedFuture,
};
pub use pipeline::{
    AdditionalInterceptorProvider, ClientPipeline, ServerPipeline, StaticInterceptorProvider,
};
pub use timing::CallTracingAdvice;
