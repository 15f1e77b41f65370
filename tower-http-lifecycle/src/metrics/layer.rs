use super::{MetricsOptions, MetricsSink, PathPatterns, RequestLabels, StatusClass};
use crate::{
    abort::DEFAULT_STATUS_ON_ABORT,
    latch::{OnSettle, SettleBody, SettleFuture, SettleGuard, Settled},
    scope::RequestScope,
};
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use std::{
    collections::HashSet,
    fmt,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};
use tower_layer::Layer;
use tower_service::Service;

/// Response future for [`RequestMetrics`].
pub type ResponseFuture<F, M> = SettleFuture<F, RecordMetrics<M>>;

/// Response body for [`RequestMetrics`].
pub type ResponseBody<B, M> = SettleBody<B, RecordMetrics<M>>;

struct Config {
    patterns: PathPatterns,
    ignored_paths: HashSet<String>,
}

/// [`Layer`] that reports request metrics to a [`MetricsSink`].
///
/// See the [module docs](crate::metrics) for an example.
pub struct RequestMetricsLayer<M> {
    sink: Arc<M>,
    config: Arc<Config>,
}

impl<M> RequestMetricsLayer<M>
where
    M: MetricsSink,
{
    /// Report to `sink` with the default [`MetricsOptions`].
    pub fn new(sink: M) -> Self {
        Self::with_options(sink, MetricsOptions::default())
    }

    /// Report to `sink` with custom options.
    ///
    /// This calls [`MetricsSink::describe`] once.
    pub fn with_options(sink: M, options: MetricsOptions) -> Self {
        sink.describe(&options.duration_buckets);
        Self {
            sink: Arc::new(sink),
            config: Arc::new(Config {
                patterns: PathPatterns::new(options.path_patterns),
                ignored_paths: options.ignored_paths.into_iter().collect(),
            }),
        }
    }
}

impl<M> Clone for RequestMetricsLayer<M> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            config: self.config.clone(),
        }
    }
}

impl<M> fmt::Debug for RequestMetricsLayer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetricsLayer")
            .field("patterns", &self.config.patterns)
            .field("ignored_paths", &self.config.ignored_paths)
            .finish()
    }
}

impl<S, M> Layer<S> for RequestMetricsLayer<M> {
    type Service = RequestMetrics<S, M>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestMetrics {
            inner,
            sink: self.sink.clone(),
            config: self.config.clone(),
        }
    }
}

/// Middleware that reports request metrics.
///
/// See the [module docs](crate::metrics) for more details.
pub struct RequestMetrics<S, M> {
    inner: S,
    sink: Arc<M>,
    config: Arc<Config>,
}

impl<S, M> RequestMetrics<S, M> {
    define_inner_service_accessors!();
}

impl<S: Clone, M> Clone for RequestMetrics<S, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: fmt::Debug, M> fmt::Debug for RequestMetrics<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetrics")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<S, M, ReqBody, ResBody> Service<Request<ReqBody>> for RequestMetrics<S, M>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    M: MetricsSink,
    ResBody: Body,
{
    type Response = Response<ResponseBody<ResBody, M>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, M>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let method = req.method().clone();
        let path = self.config.patterns.normalize(req.uri().path());
        if self.config.ignored_paths.contains(path) {
            return SettleFuture::new(self.inner.call(req), &method, None);
        }

        let recorder = RecordMetrics {
            sink: self.sink.clone(),
            method: method.clone(),
            path: path.to_owned(),
            status: None,
            start: Instant::now(),
            scope: RequestScope::get_or_insert(req.extensions_mut()),
        };

        SettleFuture::new(self.inner.call(req), &method, Some(SettleGuard::new(recorder)))
    }
}

/// Reports a single request to a [`MetricsSink`].
pub struct RecordMetrics<M> {
    sink: Arc<M>,
    method: Method,
    path: String,
    status: Option<StatusCode>,
    start: Instant,
    scope: RequestScope,
}

impl<M> fmt::Debug for RecordMetrics<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordMetrics")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("status", &self.status)
            .finish()
    }
}

impl<M> OnSettle for RecordMetrics<M>
where
    M: MetricsSink,
{
    fn on_response<B>(&mut self, response: &Response<B>) {
        self.status = Some(response.status());
    }

    fn on_settle(self, settled: Settled) {
        let status = match settled {
            Settled::Closed => self
                .scope
                .status()
                .or(self.status)
                .unwrap_or(DEFAULT_STATUS_ON_ABORT),
            // The inner service failed without a response.
            Settled::Finished => self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        };

        let labels = RequestLabels::new(self.method, self.path, StatusClass::from_status(status));
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        self.sink.increment_requests(&labels);
        self.sink.observe_duration_ms(&labels, duration_ms);
    }
}
