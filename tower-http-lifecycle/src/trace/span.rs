use super::{DefaultMakeSpan, MakeSpan};
use crate::scope::RequestScope;
use http::Request;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{instrument::Instrumented, Instrument, Level, Span};

/// [`Layer`] that opens a request span and stores it in the request scope.
///
/// See the [module docs](crate::trace) for an example.
#[derive(Debug, Clone)]
pub struct RequestSpanLayer<M = DefaultMakeSpan> {
    make_span: M,
}

impl RequestSpanLayer {
    /// Create a new [`RequestSpanLayer`] using [`DefaultMakeSpan`].
    pub fn new() -> Self {
        Self {
            make_span: DefaultMakeSpan::new(),
        }
    }

    /// Set the level of the default span.
    pub fn level(self, level: Level) -> Self {
        Self {
            make_span: self.make_span.level(level),
        }
    }

    /// Record request headers on the default span.
    pub fn include_headers(self, include_headers: bool) -> Self {
        Self {
            make_span: self.make_span.include_headers(include_headers),
        }
    }
}

impl Default for RequestSpanLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> RequestSpanLayer<M> {
    /// Create spans with a custom [`MakeSpan`].
    pub fn make_span_with<T>(self, make_span: T) -> RequestSpanLayer<T> {
        RequestSpanLayer { make_span }
    }
}

impl<S, M> Layer<S> for RequestSpanLayer<M>
where
    M: Clone,
{
    type Service = RequestSpan<S, M>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestSpan {
            inner,
            make_span: self.make_span.clone(),
        }
    }
}

/// Middleware that runs the inner service inside a request span.
///
/// A request that already carries a span in its scope keeps it.
#[derive(Debug, Clone)]
pub struct RequestSpan<S, M = DefaultMakeSpan> {
    inner: S,
    make_span: M,
}

impl<S> RequestSpan<S> {
    /// Create a new [`RequestSpan`] using [`DefaultMakeSpan`].
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            make_span: DefaultMakeSpan::new(),
        }
    }
}

impl<S, M> RequestSpan<S, M> {
    define_inner_service_accessors!();

    /// Returns a new [`Layer`] that wraps services with a [`RequestSpan`] middleware.
    pub fn layer() -> RequestSpanLayer {
        RequestSpanLayer::new()
    }
}

impl<S, M, ReqBody> Service<Request<ReqBody>> for RequestSpan<S, M>
where
    S: Service<Request<ReqBody>>,
    M: MakeSpan<ReqBody>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Instrumented<S::Future>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let scope = RequestScope::get_or_insert(req.extensions_mut());
        let span = match scope.span() {
            Some(span) => span.clone(),
            None => {
                let span = self.make_span.make_span(&req);
                scope.set_span(span.clone());
                span
            }
        };

        let future = span.in_scope(|| self.inner.call(req));
        future.instrument(span)
    }
}

/// The span opened for `request` by [`RequestSpanLayer`].
pub fn request_span<B>(request: &Request<B>) -> Option<Span> {
    RequestScope::from_request(request).and_then(|scope| scope.span().cloned())
}
