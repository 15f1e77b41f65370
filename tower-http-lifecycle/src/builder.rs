use crate::{
    abort::DetectAbortLayer,
    context::{HandleRequestClosedLayer, MakeBaseContext, SetRequestContextLayer},
    error_handler::HandleErrorsLayer,
    metrics::{MetricsSink, RequestMetricsLayer},
    request_id::{ProcessRequestId, SetRequestIdLayer},
    trace::{LogRequestsLayer, RequestSpanLayer},
};
use tower::ServiceBuilder;
use tower_layer::Stack;

/// Extension trait that adds methods to [`tower::ServiceBuilder`] for adding the request
/// lifecycle middleware of this crate.
///
/// The methods are listed in the order they are meant to be stacked, outermost first.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use http_body_util::Full;
/// use tower::{ServiceBuilder, ServiceExt};
/// use tower_http_lifecycle::{
///     context::{ensure_running, request_context, BaseContext, RequestError},
///     ServiceBuilderExt,
/// };
///
/// async fn handle(request: Request<()>) -> Result<Response<Full<Bytes>>, RequestError> {
///     let context = request_context::<BaseContext, _>(&request);
///     ensure_running(context.as_deref())?;
///     Ok(Response::new(Full::from("done")))
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let service = ServiceBuilder::new()
///     .set_x_request_id()
///     .request_span()
///     .log_requests()
///     .detect_aborts()
///     .base_context()
///     .handle_errors()
///     .handle_request_closed::<BaseContext>()
///     .service_fn(handle);
///
/// let response = service.oneshot(Request::new(())).await.unwrap();
/// assert!(response.headers().is_empty());
/// # }
/// ```
pub trait ServiceBuilderExt<L>: crate::sealed::Sealed<L> + Sized {
    /// Adopt or generate an `x-request-id` for every request.
    ///
    /// See [`tower_http_lifecycle::request_id`] for more details.
    ///
    /// [`tower_http_lifecycle::request_id`]: crate::request_id
    fn set_x_request_id(
        self,
    ) -> ServiceBuilder<Stack<SetRequestIdLayer<ProcessRequestId>, L>>;

    /// Run every request inside a `request` span.
    ///
    /// See [`RequestSpanLayer`] for more details.
    fn request_span(self) -> ServiceBuilder<Stack<RequestSpanLayer, L>>;

    /// Log the start and the end of every request.
    ///
    /// See [`LogRequestsLayer`] for more details.
    fn log_requests(self) -> ServiceBuilder<Stack<LogRequestsLayer, L>>;

    /// Report every request to a [`MetricsSink`].
    ///
    /// See [`tower_http_lifecycle::metrics`] for more details.
    ///
    /// [`tower_http_lifecycle::metrics`]: crate::metrics
    fn request_metrics<M>(self, sink: M) -> ServiceBuilder<Stack<RequestMetricsLayer<M>, L>>
    where
        M: MetricsSink;

    /// Notice clients that go away before the response is done.
    ///
    /// See [`tower_http_lifecycle::abort`] for more details.
    ///
    /// [`tower_http_lifecycle::abort`]: crate::abort
    fn detect_aborts(self) -> ServiceBuilder<Stack<DetectAbortLayer, L>>;

    /// Attach a [`BaseContext`](crate::context::BaseContext) to every request.
    fn base_context(self) -> ServiceBuilder<Stack<SetRequestContextLayer<MakeBaseContext>, L>>;

    /// Turn errors into responses.
    ///
    /// See [`tower_http_lifecycle::error_handler`] for more details.
    ///
    /// [`tower_http_lifecycle::error_handler`]: crate::error_handler
    fn handle_errors(self) -> ServiceBuilder<Stack<HandleErrorsLayer, L>>;

    /// Answer `RequestClosed` errors of closed requests with a placeholder.
    ///
    /// See [`HandleRequestClosedLayer`] for more details.
    fn handle_request_closed<C>(self) -> ServiceBuilder<Stack<HandleRequestClosedLayer<C>, L>>;
}

impl<L> crate::sealed::Sealed<L> for ServiceBuilder<L> {}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn set_x_request_id(
        self,
    ) -> ServiceBuilder<Stack<SetRequestIdLayer<ProcessRequestId>, L>> {
        self.layer(SetRequestIdLayer::x_request_id())
    }

    fn request_span(self) -> ServiceBuilder<Stack<RequestSpanLayer, L>> {
        self.layer(RequestSpanLayer::new())
    }

    fn log_requests(self) -> ServiceBuilder<Stack<LogRequestsLayer, L>> {
        self.layer(LogRequestsLayer::new())
    }

    fn request_metrics<M>(self, sink: M) -> ServiceBuilder<Stack<RequestMetricsLayer<M>, L>>
    where
        M: MetricsSink,
    {
        self.layer(RequestMetricsLayer::new(sink))
    }

    fn detect_aborts(self) -> ServiceBuilder<Stack<DetectAbortLayer, L>> {
        self.layer(DetectAbortLayer::new())
    }

    fn base_context(self) -> ServiceBuilder<Stack<SetRequestContextLayer<MakeBaseContext>, L>> {
        self.layer(SetRequestContextLayer::base())
    }

    fn handle_errors(self) -> ServiceBuilder<Stack<HandleErrorsLayer, L>> {
        self.layer(HandleErrorsLayer::new())
    }

    fn handle_request_closed<C>(self) -> ServiceBuilder<Stack<HandleRequestClosedLayer<C>, L>> {
        self.layer(HandleRequestClosedLayer::new())
    }
}
