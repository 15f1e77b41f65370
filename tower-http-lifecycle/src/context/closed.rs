use super::{RequestContext, RequestError};
use crate::{abort::DEFAULT_STATUS_ON_ABORT, scope::RequestScope};
use http::{Request, Response};
use pin_project_lite::pin_project;
use std::{
    fmt,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tower_layer::Layer;
use tower_service::Service;

/// Turn [`RequestError::Closed`] from a closed request into a placeholder
/// response.
///
/// The client is gone, so the response is never delivered. Its status is the
/// status recorded for the request, `400 Bad Request` if there is none.
pub struct HandleRequestClosedLayer<C> {
    _context: PhantomData<fn() -> C>,
}

impl<C> HandleRequestClosedLayer<C> {
    /// Create a new [`HandleRequestClosedLayer`].
    pub fn new() -> Self {
        Self {
            _context: PhantomData,
        }
    }
}

impl<C> Default for HandleRequestClosedLayer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for HandleRequestClosedLayer<C> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for HandleRequestClosedLayer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRequestClosedLayer").finish()
    }
}

impl<S, C> Layer<S> for HandleRequestClosedLayer<C> {
    type Service = HandleRequestClosed<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        HandleRequestClosed::new(inner)
    }
}

/// Middleware that swallows [`RequestError::Closed`] for closed requests.
///
/// See [`HandleRequestClosedLayer`].
pub struct HandleRequestClosed<S, C> {
    inner: S,
    _context: PhantomData<fn() -> C>,
}

impl<S, C> HandleRequestClosed<S, C> {
    /// Create a new [`HandleRequestClosed`].
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            _context: PhantomData,
        }
    }

    define_inner_service_accessors!();
}

impl<S: Clone, C> Clone for HandleRequestClosed<S, C> {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

impl<S: fmt::Debug, C> fmt::Debug for HandleRequestClosed<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRequestClosed")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<S, C, ReqBody, ResBody> Service<Request<ReqBody>> for HandleRequestClosed<S, C>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>, Error = RequestError>,
    C: RequestContext,
    ResBody: Default,
{
    type Response = S::Response;
    type Error = RequestError;
    type Future = ResponseFuture<S::Future, C>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let scope = RequestScope::get_or_insert(req.extensions_mut());
        ResponseFuture {
            inner: self.inner.call(req),
            scope,
            _context: PhantomData,
        }
    }
}

pin_project! {
    /// Response future for [`HandleRequestClosed`].
    pub struct ResponseFuture<F, C> {
        #[pin]
        inner: F,
        scope: RequestScope,
        _context: PhantomData<fn() -> C>,
    }
}

impl<F, C, B> Future for ResponseFuture<F, C>
where
    F: Future<Output = Result<Response<B>, RequestError>>,
    C: RequestContext,
    B: Default,
{
    type Output = Result<Response<B>, RequestError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match ready!(this.inner.poll(cx)) {
            Err(RequestError::Closed(closed)) => match this.scope.context::<C>() {
                Some(context) if context.is_closed() => {
                    context
                        .span()
                        .in_scope(|| tracing::debug!("handled request closed error"));
                    let mut response = Response::new(B::default());
                    *response.status_mut() =
                        this.scope.status().unwrap_or(DEFAULT_STATUS_ON_ABORT);
                    Poll::Ready(Ok(response))
                }
                _ => Poll::Ready(Err(RequestError::Closed(closed))),
            },
            other => Poll::Ready(other),
        }
    }
}
