//! Map service errors to responses.
//!
//! [`HandleErrors`] answers every call with a response. Only readiness errors
//! of the inner service are passed on.
//!
//! [`HttpError`]s are expected: they are logged at `DEBUG` and answered with
//! their status and a JSON body `{"message": "..."}`. Any other error is
//! unexpected: it is logged at `ERROR` and answered with an empty
//! `500 Internal Server Error`.
//!
//! ```
//! use http::{Request, Response, StatusCode};
//! use http_body_util::Full;
//! use bytes::Bytes;
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_http_lifecycle::error_handler::{HandleErrorsLayer, HttpError};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let svc = ServiceBuilder::new()
//!     .layer(HandleErrorsLayer::new())
//!     .service_fn(|_req: Request<()>| async {
//!         Err::<Response<Full<Bytes>>, _>(HttpError::not_found("no such user"))
//!     });
//!
//! let res = svc.oneshot(Request::new(())).await.unwrap();
//! assert_eq!(res.status(), StatusCode::NOT_FOUND);
//! # }
//! ```

use crate::{context::RequestError, BoxError};
use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full};
use pin_project_lite::pin_project;
use std::{
    borrow::Cow,
    error::Error,
    fmt,
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tower_layer::Layer;
use tower_service::Service;

/// An error that maps to a specific HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    status: StatusCode,
    message: Cow<'static, str>,
}

impl HttpError {
    /// An error answered with `status` and `message`.
    pub fn new<M>(status: StatusCode, message: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `400 Bad Request`.
    pub fn bad_request<M: Into<Cow<'static, str>>>(message: M) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// `401 Unauthorized`.
    pub fn unauthorized<M: Into<Cow<'static, str>>>(message: M) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// `403 Forbidden`.
    pub fn forbidden<M: Into<Cow<'static, str>>>(message: M) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// `404 Not Found`.
    pub fn not_found<M: Into<Cow<'static, str>>>(message: M) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// `409 Conflict`.
    pub fn conflict<M: Into<Cow<'static, str>>>(message: M) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// The status the error is answered with.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The message sent in the JSON body.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the status is a `4xx`.
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    fn json_body(&self) -> String {
        serde_json::json!({ "message": self.message }).to_string()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl Error for HttpError {}

/// Layer that applies [`HandleErrors`].
///
/// See the [module docs](self) for an example.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct HandleErrorsLayer;

impl HandleErrorsLayer {
    /// Create a new [`HandleErrorsLayer`].
    pub fn new() -> Self {
        HandleErrorsLayer {}
    }
}

impl<S> Layer<S> for HandleErrorsLayer {
    type Service = HandleErrors<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HandleErrors::new(inner)
    }
}

/// Middleware that turns errors into responses.
///
/// See the [module docs](self) for an example.
#[derive(Debug, Clone, Copy)]
pub struct HandleErrors<S> {
    inner: S,
}

impl<S> HandleErrors<S> {
    /// Create a new [`HandleErrors`].
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    define_inner_service_accessors!();

    /// Returns a new [`Layer`] that wraps services with a [`HandleErrors`] middleware.
    pub fn layer() -> HandleErrorsLayer {
        HandleErrorsLayer::new()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HandleErrors<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
{
    type Response = Response<UnsyncBoxBody<Bytes, ResBody::Error>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        ResponseFuture {
            inner: self.inner.call(req),
        }
    }
}

pin_project! {
    /// Response future for [`HandleErrors`].
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
    }
}

impl<F, ResBody, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
{
    type Output = Result<Response<UnsyncBoxBody<Bytes, ResBody::Error>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().inner.poll(cx)) {
            Ok(res) => Poll::Ready(Ok(res.map(|body| body.boxed_unsync()))),
            Err(err) => Poll::Ready(Ok(error_response(err.into()))),
        }
    }
}

fn classify(err: BoxError) -> Result<HttpError, BoxError> {
    let err = match err.downcast::<RequestError>() {
        Ok(request_error) => match *request_error {
            RequestError::Failed(inner) => inner,
            closed @ RequestError::Closed(_) => return Err(Box::new(closed)),
        },
        Err(err) => err,
    };

    match err.downcast::<HttpError>() {
        Ok(http_error) => Ok(*http_error),
        Err(err) => Err(err),
    }
}

fn error_response<E>(err: BoxError) -> Response<UnsyncBoxBody<Bytes, E>>
where
    E: 'static,
{
    match classify(err) {
        Ok(http_error) => {
            tracing::debug!(
                reason = http_error.message(),
                "handled expected error: {}",
                http_error.status()
            );
            let mut res = Response::new(
                Full::from(http_error.json_body())
                    .map_err(|err| match err {})
                    .boxed_unsync(),
            );
            *res.status_mut() = http_error.status();
            res.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            res
        }
        Err(err) => {
            tracing::error!(error = %err, "unexpected error");
            let mut res = Response::new(Empty::new().map_err(|err| match err {}).boxed_unsync());
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            res
        }
    }
}
