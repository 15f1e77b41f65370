//! Request scoped spans and start/finish request logging.
//!
//! [`RequestSpanLayer`] opens a `request` span for every request and stores it
//! in the request's scope, so later middleware and handlers log inside it.
//! [`LogRequestsLayer`] logs a line when a request starts and one when it
//! finishes or is aborted, including any statistics added with
//! [`add_request_statistic`].
//!
//! # Example
//!
//! ```rust
//! use http::{Request, Response};
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_http_lifecycle::{
//!     request_id::SetRequestIdLayer,
//!     trace::{add_request_statistic, LogRequestsLayer, RequestSpanLayer},
//! };
//! use std::convert::Infallible;
//!
//! # #[tokio::main]
//! # async fn main() {
//! tracing_subscriber::fmt::init();
//!
//! let svc = ServiceBuilder::new()
//!     .layer(SetRequestIdLayer::x_request_id())
//!     .layer(RequestSpanLayer::new())
//!     .layer(LogRequestsLayer::new())
//!     .service_fn(|req: Request<String>| async move {
//!         add_request_statistic(&req, "db_queries", 2);
//!         Ok::<_, Infallible>(Response::new(String::from("ok")))
//!     });
//!
//! let _res = svc.oneshot(Request::new(String::new())).await.unwrap();
//! # }
//! ```
//!
//! With `RUST_LOG=tower_http_lifecycle=debug` that prints something like:
//!
//! ```text
//! DEBUG request{request_id="web-1/Zm9vYmFyYmF6cXV4-1" method=GET uri=/ version=HTTP/1.1}: tower_http_lifecycle::trace::log: req started: GET /
//! DEBUG request{request_id="web-1/Zm9vYmFyYmF6cXV4-1" method=GET uri=/ version=HTTP/1.1}: tower_http_lifecycle::trace::log: req finished: GET / status=200 aborted=false duration_ns=41291 statistics={"db_queries": 2}
//! ```

mod log;
mod make_span;
mod span;

pub use self::{
    log::{LogRequests, LogRequestsLayer, RequestLogger, ResponseBody, ResponseFuture},
    make_span::{DefaultMakeSpan, MakeSpan},
    span::{request_span, RequestSpan, RequestSpanLayer},
};

use crate::scope::RequestScope;
use http::Request;
use std::borrow::Cow;
use tracing::Level;

const DEFAULT_MESSAGE_LEVEL: Level = Level::DEBUG;

/// Set the statistic `key` of `request` to `value`.
///
/// A later call with the same key replaces the value. Statistics are logged when the request finishes. Without a request scope
/// this does nothing.
pub fn add_request_statistic<B, K>(request: &Request<B>, key: K, value: u64)
where
    K: Into<Cow<'static, str>>,
{
    if let Some(scope) = RequestScope::from_request(request) {
        scope.add_statistic(key, value);
    }
}
