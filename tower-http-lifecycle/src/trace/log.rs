use super::DEFAULT_MESSAGE_LEVEL;
use crate::{
    latch::{OnSettle, SettleBody, SettleFuture, SettleGuard, Settled},
    request_id::RequestId,
    scope::RequestScope,
};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use std::{
    sync::Once,
    task::{Context, Poll},
    time::Instant,
};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{Level, Span};

static MISSING_SPAN: Once = Once::new();

/// Response future for [`LogRequests`].
pub type ResponseFuture<F> = SettleFuture<F, RequestLogger>;

/// Response body for [`LogRequests`].
pub type ResponseBody<B> = SettleBody<B, RequestLogger>;

/// [`Layer`] that logs the start and end of every request.
///
/// See the [module docs](crate::trace) for an example.
#[derive(Debug, Clone, Copy)]
pub struct LogRequestsLayer {
    level: Level,
}

impl LogRequestsLayer {
    /// Create a new [`LogRequestsLayer`] logging at `DEBUG`.
    pub fn new() -> Self {
        Self {
            level: DEFAULT_MESSAGE_LEVEL,
        }
    }

    /// Set the [`Level`] used for both lines.
    ///
    /// Defaults to [`Level::DEBUG`].
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl Default for LogRequestsLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for LogRequestsLayer {
    type Service = LogRequests<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LogRequests {
            inner,
            level: self.level,
        }
    }
}

/// Middleware that logs the start and end of every request.
///
/// `HEAD` requests are not logged.
#[derive(Debug, Clone)]
pub struct LogRequests<S> {
    inner: S,
    level: Level,
}

impl<S> LogRequests<S> {
    /// Create a new [`LogRequests`] logging at `DEBUG`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            level: DEFAULT_MESSAGE_LEVEL,
        }
    }

    define_inner_service_accessors!();

    /// Returns a new [`Layer`] that wraps services with a [`LogRequests`] middleware.
    pub fn layer() -> LogRequestsLayer {
        LogRequestsLayer::new()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for LogRequests<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Body,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if req.method() == Method::HEAD {
            return SettleFuture::new(self.inner.call(req), &Method::HEAD, None);
        }

        let scope = RequestScope::get_or_insert(req.extensions_mut());
        let span = match scope.span() {
            Some(span) => span.clone(),
            None => {
                MISSING_SPAN.call_once(|| {
                    tracing::error!(
                        "No request scoped logger found. Did you add the request span layer \
                         before the logging layer?"
                    )
                });
                Span::current()
            }
        };

        let logger = RequestLogger {
            level: self.level,
            method: req.method().clone(),
            uri: req.uri().clone(),
            request_id: scope
                .request_id()
                .cloned()
                .or_else(|| RequestId::from_request(&req)),
            status: None,
            start: Instant::now(),
            scope,
            span,
        };

        logger.span.in_scope(|| {
            event_dynamic_lvl!(
                logger.level,
                request_id = logger.request_id.as_ref().and_then(RequestId::to_str),
                "req started: {} {}",
                logger.method,
                logger.uri
            )
        });

        let method = req.method().clone();
        SettleFuture::new(self.inner.call(req), &method, Some(SettleGuard::new(logger)))
    }
}

/// Logs the end of a request.
#[derive(Debug)]
pub struct RequestLogger {
    level: Level,
    method: Method,
    uri: Uri,
    request_id: Option<RequestId>,
    status: Option<StatusCode>,
    start: Instant,
    scope: RequestScope,
    span: Span,
}

impl OnSettle for RequestLogger {
    fn on_response<B>(&mut self, response: &Response<B>) {
        self.status = Some(response.status());
    }

    fn on_settle(self, settled: Settled) {
        let aborted = settled == Settled::Closed;
        let status = if aborted {
            self.scope.status().or(self.status)
        } else {
            self.status
        };
        let duration_ns = u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX);

        let _entered = self.span.enter();
        event_dynamic_lvl!(
            self.level,
            request_id = self.request_id.as_ref().and_then(RequestId::to_str),
            status = status.map(|status| status.as_u16()),
            aborted,
            duration_ns,
            statistics = ?self.scope.statistics(),
            "req finished: {} {}",
            self.method,
            self.uri
        );
    }
}
