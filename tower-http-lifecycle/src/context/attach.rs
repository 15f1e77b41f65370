use super::BaseContext;
use crate::scope::RequestScope;
use http::{request::Parts, Request};
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Builds the context for a request.
pub trait MakeContext {
    /// The context type attached to requests.
    type Context: Send + Sync + 'static;

    /// Build the context for a request from its head.
    fn make_context(&mut self, request_parts: &Parts) -> Self::Context;
}

impl<F, C> MakeContext for F
where
    F: FnMut(&Parts) -> C,
    C: Send + Sync + 'static,
{
    type Context = C;

    fn make_context(&mut self, request_parts: &Parts) -> C {
        self(request_parts)
    }
}

/// Makes a [`BaseContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeBaseContext;

impl MakeContext for MakeBaseContext {
    type Context = BaseContext;

    fn make_context(&mut self, request_parts: &Parts) -> BaseContext {
        BaseContext::new(request_parts)
    }
}

/// Attach a request context to every request.
#[derive(Debug, Clone)]
pub struct SetRequestContextLayer<M> {
    make_context: M,
}

impl<M> SetRequestContextLayer<M> {
    /// Create a new [`SetRequestContextLayer`].
    pub fn new(make_context: M) -> Self {
        Self { make_context }
    }
}

impl SetRequestContextLayer<MakeBaseContext> {
    /// Attach a [`BaseContext`].
    pub fn base() -> Self {
        Self::new(MakeBaseContext)
    }
}

impl<S, M> Layer<S> for SetRequestContextLayer<M>
where
    M: Clone,
{
    type Service = SetRequestContext<S, M>;

    fn layer(&self, inner: S) -> Self::Service {
        SetRequestContext::new(inner, self.make_context.clone())
    }
}

/// Middleware that attaches a request context.
///
/// The context is built at most once per request, even when the middleware is
/// applied more than once.
#[derive(Debug, Clone)]
pub struct SetRequestContext<S, M> {
    inner: S,
    make_context: M,
}

impl<S, M> SetRequestContext<S, M> {
    /// Create a new [`SetRequestContext`].
    pub fn new(inner: S, make_context: M) -> Self {
        Self {
            inner,
            make_context,
        }
    }

    define_inner_service_accessors!();

    /// Returns a new [`Layer`] that wraps services with a [`SetRequestContext`] middleware.
    pub fn layer(make_context: M) -> SetRequestContextLayer<M> {
        SetRequestContextLayer::new(make_context)
    }
}

impl<S, M, ReqBody> Service<Request<ReqBody>> for SetRequestContext<S, M>
where
    S: Service<Request<ReqBody>>,
    M: MakeContext,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let (mut parts, body) = req.into_parts();

        let scope = RequestScope::get_or_insert(&mut parts.extensions);
        let make_context = &mut self.make_context;
        if scope
            .context_or_init(|| make_context.make_context(&parts))
            .is_none()
        {
            tracing::debug!("request already carries a context of another type");
        }

        self.inner.call(Request::from_parts(parts, body))
    }
}
