use super::{AbortNotifier, AbortPolicy, DetectAbortLayer, ResponseBody, ResponseFuture};
use crate::{latch::SettleGuard, scope::RequestScope, BoxError};
use http::{Method, Request, Response};
use http_body::Body;
use std::task::{Context, Poll};
use tower_service::Service;
use tracing::{Instrument, Level, Span};

/// Middleware that detects client aborts.
///
/// See the [module docs](crate::abort) for more details.
///
/// Calling the service spawns a task, so it panics outside of a tokio runtime.
#[derive(Debug, Clone)]
pub struct DetectAbort<S> {
    inner: S,
    level: Level,
    policy: AbortPolicy,
}

impl<S> DetectAbort<S> {
    pub(crate) fn new(inner: S, level: Level, policy: AbortPolicy) -> Self {
        Self {
            inner,
            level,
            policy,
        }
    }

    define_inner_service_accessors!();

    /// Returns a new [`Layer`] that wraps services with a [`DetectAbort`] middleware.
    ///
    /// [`Layer`]: tower_layer::Layer
    pub fn layer() -> DetectAbortLayer {
        DetectAbortLayer::new()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DetectAbort<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ResBody: Body + Send + 'static,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = BoxError;
    type Future = ResponseFuture<ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let head = req.method() == Method::HEAD;
        let scope = RequestScope::get_or_insert(req.extensions_mut());
        let span = scope.span().cloned().unwrap_or_else(Span::current);

        let future = span.in_scope(|| self.inner.call(req));
        let task_scope = scope.clone();
        let task = tokio::spawn(
            async move {
                let result = future.await.map_err(Into::into);
                if task_scope.is_aborted() {
                    if let Ok(response) = &result {
                        tracing::debug!(
                            status = response.status().as_u16(),
                            "discarding response of aborted request"
                        );
                    }
                }
                result
            }
            .instrument(span.clone()),
        );

        let guard = SettleGuard::new(AbortNotifier {
            scope,
            level: self.level,
            policy: self.policy,
            span,
        });

        ResponseFuture::new(task, guard, head)
    }
}
