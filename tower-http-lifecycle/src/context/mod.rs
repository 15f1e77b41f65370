//! Request contexts and cooperative cancellation.
//!
//! A request context carries the request id, the request span and whether the
//! request was closed by its client. [`SetRequestContextLayer`] attaches one to
//! each request, handlers fetch it with [`request_context`] and call
//! [`ensure_running`] between steps of long running work:
//!
//! ```
//! use http::{Request, Response};
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_http_lifecycle::context::{
//!     ensure_running, request_context, BaseContext, HandleRequestClosedLayer, RequestError,
//!     SetRequestContextLayer,
//! };
//!
//! async fn handler(req: Request<String>) -> Result<Response<String>, RequestError> {
//!     let context = request_context::<BaseContext, _>(&req);
//!     for _step in 0..3 {
//!         ensure_running(context.as_deref())?;
//!         tokio::task::yield_now().await;
//!     }
//!     Ok(Response::new("done".to_owned()))
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let svc = ServiceBuilder::new()
//!     .layer(SetRequestContextLayer::base())
//!     .layer(HandleRequestClosedLayer::<BaseContext>::new())
//!     .service_fn(handler);
//!
//! let res = svc.oneshot(Request::new(String::new())).await.unwrap();
//! assert_eq!(res.body(), "done");
//! # }
//! ```

mod attach;
mod closed;
mod error;

pub use self::{
    attach::{MakeBaseContext, MakeContext, SetRequestContext, SetRequestContextLayer},
    closed::{HandleRequestClosed, HandleRequestClosedLayer, ResponseFuture},
    error::{RequestClosed, RequestError},
};

use crate::{request_id::RequestId, scope::RequestScope};
use http::{request::Parts, Extensions, Request};
use std::sync::Arc;
use tracing::Span;

/// State a handler needs to log and to notice a closed request.
pub trait RequestContext: Send + Sync + 'static {
    /// The request id, if one was assigned.
    fn request_id(&self) -> Option<&RequestId>;

    /// The span to log request scoped events in.
    fn span(&self) -> &Span;

    /// Whether the client went away before the response finished.
    fn is_closed(&self) -> bool;
}

impl<C> RequestContext for Arc<C>
where
    C: RequestContext + ?Sized,
{
    fn request_id(&self) -> Option<&RequestId> {
        (**self).request_id()
    }

    fn span(&self) -> &Span {
        (**self).span()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// The stock [`RequestContext`].
///
/// Host specific contexts usually embed one and delegate to it.
#[derive(Debug, Clone)]
pub struct BaseContext {
    request_id: Option<RequestId>,
    span: Span,
    scope: RequestScope,
}

impl BaseContext {
    /// Build a context from the scope stored in `parts`.
    ///
    /// Without a scope the context can never become closed.
    pub fn new(parts: &Parts) -> Self {
        Self::from_extensions(&parts.extensions)
    }

    fn from_extensions(extensions: &Extensions) -> Self {
        let scope = RequestScope::from_extensions(extensions).unwrap_or_default();
        Self {
            request_id: scope
                .request_id()
                .cloned()
                .or_else(|| RequestId::from_extensions(extensions)),
            span: scope.span().cloned().unwrap_or_else(Span::current),
            scope,
        }
    }

    /// The scope this context reads its closed state from.
    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }
}

impl RequestContext for BaseContext {
    fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    fn span(&self) -> &Span {
        &self.span
    }

    fn is_closed(&self) -> bool {
        self.scope.is_aborted()
    }
}

/// Get the context attached to `request` by [`SetRequestContextLayer`].
pub fn request_context<C, B>(request: &Request<B>) -> Option<Arc<C>>
where
    C: Send + Sync + 'static,
{
    request_context_from_extensions(request.extensions())
}

/// Get the context attached to a request, given its extensions.
pub fn request_context_from_extensions<C>(extensions: &Extensions) -> Option<Arc<C>>
where
    C: Send + Sync + 'static,
{
    RequestScope::from_extensions(extensions)?.context::<C>()
}

/// Fail with [`RequestClosed`] if the request's client went away.
///
/// A missing context counts as running. The check is only as fresh as the
/// moment it is made.
pub fn ensure_running<C>(context: Option<&C>) -> Result<(), RequestClosed>
where
    C: RequestContext + ?Sized,
{
    match context {
        Some(context) if context.is_closed() => Err(RequestClosed::new()),
        _ => Ok(()),
    }
}
