//! Detect requests whose client went away before the response finished.
//!
//! [`DetectAbortLayer`] watches the response future and the response body.
//! If either is dropped before the response is fully handed over, the
//! request's [`RequestScope`] is settled as [`Outcome::Aborted`], one line is
//! logged, and with [`AbortPolicy::ForceStatus`] the configured status becomes
//! the request's recorded status.
//!
//! The wrapped service runs on its own tokio task. A disconnect drops only the
//! future waiting for that task, so the handler keeps running and can notice
//! the closed request through [`ensure_running`].
//!
//! # Example
//!
//! ```
//! use http::{Request, Response};
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_http_lifecycle::abort::{is_aborted_by_client, DetectAbortLayer};
//! use std::{convert::Infallible, time::Duration};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let svc = ServiceBuilder::new()
//!     .layer(DetectAbortLayer::new())
//!     .service_fn(|req: Request<String>| async move {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!         // `false` here, the caller below gives up after 10ms.
//!         let _aborted = is_aborted_by_client(&req);
//!         Ok::<_, Infallible>(Response::new(String::new()))
//!     });
//!
//! let result = tokio::time::timeout(Duration::from_millis(10), svc.oneshot(Request::default())).await;
//! assert!(result.is_err());
//! # }
//! ```
//!
//! [`RequestScope`]: crate::scope::RequestScope
//! [`Outcome::Aborted`]: crate::scope::Outcome::Aborted
//! [`ensure_running`]: crate::context::ensure_running

mod future;
mod layer;
mod service;

pub use self::{
    future::{AbortNotifier, ResponseBody, ResponseFuture},
    layer::DetectAbortLayer,
    service::DetectAbort,
};

use crate::scope::RequestScope;
use http::{Request, StatusCode};
use std::fmt;

/// Status recorded for an aborted request by default.
pub const DEFAULT_STATUS_ON_ABORT: StatusCode = StatusCode::BAD_REQUEST;

/// What to record when a request is aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortPolicy {
    /// Only settle the abort flag.
    Record,
    /// Settle the abort flag and record the given terminal status.
    ForceStatus(StatusCode),
}

impl Default for AbortPolicy {
    fn default() -> Self {
        Self::ForceStatus(DEFAULT_STATUS_ON_ABORT)
    }
}

/// Whether the client of `request` went away before its response finished.
///
/// `false` when the request never passed through [`DetectAbortLayer`].
pub fn is_aborted_by_client<B>(request: &Request<B>) -> bool {
    RequestScope::from_request(request).map_or(false, |scope| scope.is_aborted())
}

/// The handler task was cancelled before it produced a response.
#[derive(Debug, Default)]
pub struct HandlerCancelled(());

impl HandlerCancelled {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

impl fmt::Display for HandlerCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("request handler task was cancelled")
    }
}

impl std::error::Error for HandlerCancelled {}
