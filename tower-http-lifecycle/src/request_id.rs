//! Set and propagate a per-request identifier.
//!
//! [`SetRequestIdLayer::x_request_id`] adopts a caller supplied `x-request-id`
//! header, or generates an id of the form `{hostname}/{salt}-{counter}` where
//! the prefix is computed once per [`ProcessRequestId`] and the counter wraps
//! after [`MAX_REQUEST_ID`].
//!
//! ```
//! use http::{Request, Response};
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_http_lifecycle::request_id::{RequestId, SetRequestIdLayer};
//! use std::convert::Infallible;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Infallible> {
//! let mut svc = ServiceBuilder::new()
//!     .layer(SetRequestIdLayer::x_request_id())
//!     .service_fn(|req: Request<()>| async move {
//!         let id = RequestId::from_request(&req).unwrap();
//!         Ok::<_, Infallible>(Response::new(id.to_string()))
//!     });
//!
//! let request = Request::builder()
//!     .header("x-request-id", "from-the-edge")
//!     .body(())
//!     .unwrap();
//! let response = svc.ready().await?.call(request).await?;
//! assert_eq!(response.body(), "from-the-edge");
//! # Ok(())
//! # }
//! ```

use crate::scope::RequestScope;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use http::{
    header::{HeaderName, HeaderValue},
    request::Parts,
    Extensions, Request,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tower_layer::Layer;
use tower_service::Service;

/// The header requests ids are read from and written to by default.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Largest counter value before [`ProcessRequestId`] wraps back to 1.
pub const MAX_REQUEST_ID: u64 = 999_999_999;

/// Trait for producing [`RequestId`]s.
///
/// Returns the header to write the id to, and the id. `None` leaves the request untouched.
pub trait MakeRequestId {
    /// Make the id for a request.
    fn make_request_id(&mut self, request_parts: &Parts) -> (HeaderName, Option<RequestId>);
}

impl<F> MakeRequestId for F
where
    F: FnMut(&Parts) -> (HeaderName, Option<RequestId>),
{
    fn make_request_id(&mut self, request_parts: &Parts) -> (HeaderName, Option<RequestId>) {
        self(request_parts)
    }
}

/// Generates `{hostname}/{salt}-{counter}` ids.
///
/// Clones share the counter, so every clone of a layer hands out distinct ids.
#[derive(Debug, Clone)]
pub struct ProcessRequestId {
    header_name: HeaderName,
    state: Arc<IdState>,
}

#[derive(Debug)]
struct IdState {
    prefix: String,
    counter: AtomicU64,
}

impl ProcessRequestId {
    /// Ids written to `header_name`, counting from 1.
    pub fn new(header_name: HeaderName) -> Self {
        Self::starting_after(header_name, 0)
    }

    /// Ids written to `x-request-id`.
    pub fn x_request_id() -> Self {
        Self::new(X_REQUEST_ID)
    }

    fn starting_after(header_name: HeaderName, last: u64) -> Self {
        Self {
            header_name,
            state: Arc::new(IdState {
                prefix: process_prefix(),
                counter: AtomicU64::new(last),
            }),
        }
    }

    /// The `{hostname}/{salt}` part shared by every generated id.
    pub fn prefix(&self) -> &str {
        &self.state.prefix
    }

    fn next_counter(&self) -> u64 {
        let previous = self
            .state
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(next_after(id))
            })
            .unwrap_or_else(|id| id);
        next_after(previous)
    }
}

fn next_after(id: u64) -> u64 {
    if id >= MAX_REQUEST_ID {
        1
    } else {
        id + 1
    }
}

impl MakeRequestId for ProcessRequestId {
    fn make_request_id(&mut self, request_parts: &Parts) -> (HeaderName, Option<RequestId>) {
        match request_parts.headers.get(&self.header_name) {
            Some(value) if !value.is_empty() => (self.header_name.clone(), None),
            _ => {
                let id = format!("{}-{}", self.state.prefix, self.next_counter());
                let id = HeaderValue::try_from(id).ok().map(RequestId::new);
                (self.header_name.clone(), id)
            }
        }
    }
}

fn process_prefix() -> String {
    let uuid = uuid::Uuid::new_v4();
    let salt = URL_SAFE_NO_PAD.encode(&uuid.as_bytes()[..12]);
    format!("{}/{}", hostname(), salt)
}

fn hostname() -> String {
    let raw = raw_hostname();
    let raw = raw.trim();
    if raw.is_empty() {
        return "localhost".to_owned();
    }
    raw.chars()
        .map(|c| if c.is_ascii_graphic() { c } else { '-' })
        .collect()
}

#[cfg(target_os = "linux")]
fn raw_hostname() -> String {
    rustix::system::uname()
        .nodename()
        .to_string_lossy()
        .into_owned()
}

#[cfg(not(target_os = "linux"))]
fn raw_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default()
}

/// An identifier for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(HeaderValue);

impl RequestId {
    /// Create a new [`RequestId`] from a [`HeaderValue`].
    pub fn new<T>(header_value: T) -> Self
    where
        T: Into<HeaderValue>,
    {
        Self(header_value.into())
    }

    /// Gets a reference to the underlying [`HeaderValue`].
    pub fn header_value(&self) -> &HeaderValue {
        &self.0
    }

    /// Consumes `self`, returning the underlying [`HeaderValue`].
    pub fn into_header_value(self) -> HeaderValue {
        self.0
    }

    /// The id as a string, if it is visible ASCII.
    pub fn to_str(&self) -> Option<&str> {
        self.0.to_str().ok()
    }

    /// The id stored on `request`.
    pub fn from_request<B>(request: &Request<B>) -> Option<Self> {
        Self::from_extensions(request.extensions())
    }

    /// The id stored in `extensions`.
    pub fn from_extensions(extensions: &Extensions) -> Option<Self> {
        extensions.get().cloned()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.0.as_bytes()))
    }
}

/// Set request id headers and extensions on requests.
#[derive(Debug, Clone)]
pub struct SetRequestIdLayer<M> {
    make_request_id: M,
}

impl<M> SetRequestIdLayer<M> {
    /// Create a new [`SetRequestIdLayer`].
    pub fn new(make_request_id: M) -> Self {
        SetRequestIdLayer { make_request_id }
    }
}

impl SetRequestIdLayer<ProcessRequestId> {
    /// Use [`ProcessRequestId`] with the `x-request-id` header.
    pub fn x_request_id() -> Self {
        Self::new(ProcessRequestId::x_request_id())
    }
}

impl<S, M> Layer<S> for SetRequestIdLayer<M>
where
    M: Clone,
{
    type Service = SetRequestId<S, M>;

    fn layer(&self, inner: S) -> Self::Service {
        SetRequestId::new(inner, self.make_request_id.clone())
    }
}

/// Set request id headers and extensions on requests.
///
/// An id already present in the header is kept.
#[derive(Debug, Clone)]
pub struct SetRequestId<S, M> {
    inner: S,
    make_request_id: M,
}

impl<S, M> SetRequestId<S, M> {
    /// Create a new [`SetRequestId`].
    pub fn new(inner: S, make_request_id: M) -> Self {
        Self {
            inner,
            make_request_id,
        }
    }

    define_inner_service_accessors!();

    /// Returns a new [`Layer`] that wraps services with a [`SetRequestId`] middleware.
    pub fn layer(make_request_id: M) -> SetRequestIdLayer<M> {
        SetRequestIdLayer::new(make_request_id)
    }
}

impl<S> SetRequestId<S, ProcessRequestId> {
    /// Create a new [`SetRequestId`] that uses [`ProcessRequestId`] and `x-request-id`.
    pub fn x_request_id(inner: S) -> Self {
        Self::new(inner, ProcessRequestId::x_request_id())
    }
}

impl<S, M, ReqBody> Service<Request<ReqBody>> for SetRequestId<S, M>
where
    S: Service<Request<ReqBody>>,
    M: MakeRequestId,
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

        let request_id = match self.make_request_id.make_request_id(&parts) {
            (header, Some(request_id)) => {
                parts.headers.insert(header, request_id.0.clone());
                Some(request_id)
            }
            (header, None) => RequestId::from_extensions(&parts.extensions).or_else(|| {
                parts
                    .headers
                    .get(header)
                    .map(|value| RequestId::new(value.clone()))
            }),
        };

        if let Some(request_id) = request_id {
            RequestScope::get_or_insert(&mut parts.extensions).set_request_id(request_id.clone());
            parts.extensions.insert(request_id);
        }

        let req = Request::from_parts(parts, body);

        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Response;
    use std::{collections::HashSet, convert::Infallible};
    use tower::{ServiceBuilder, ServiceExt};

    async fn echo_id(req: Request<()>) -> Result<Response<String>, Infallible> {
        let id = RequestId::from_request(&req).unwrap();
        let header = req.headers()[X_REQUEST_ID].to_str().unwrap().to_owned();
        let scoped = RequestScope::from_request(&req)
            .and_then(|scope| scope.request_id().cloned())
            .unwrap();
        assert_eq!(id, scoped);
        assert_eq!(id.to_str().unwrap(), header);
        Ok(Response::new(id.to_string()))
    }

    #[tokio::test]
    async fn adopts_incoming_header() {
        let svc = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id())
            .service_fn(echo_id);

        let req = Request::builder()
            .header("X-Request-Id", "abc-123")
            .body(())
            .unwrap();
        let res = svc.oneshot(req).await.unwrap();

        assert_eq!(res.body(), "abc-123");
    }

    #[tokio::test]
    async fn generates_prefixed_ids() {
        let make = ProcessRequestId::x_request_id();
        let prefix = make.prefix().to_owned();
        let svc = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(make))
            .service_fn(echo_id);

        let first = svc.clone().oneshot(Request::new(())).await.unwrap();
        let second = svc.oneshot(Request::new(())).await.unwrap();

        assert_eq!(first.body(), &format!("{prefix}-1"));
        assert_eq!(second.body(), &format!("{prefix}-2"));
    }

    #[tokio::test]
    async fn sequential_ids_are_distinct() {
        let svc = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id())
            .service_fn(echo_id);

        let mut ids = HashSet::new();
        for _ in 0..10 {
            let res = svc.clone().oneshot(Request::new(())).await.unwrap();
            ids.insert(res.into_body());
        }

        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn ids_stay_distinct_across_the_wrap() {
        let mut make = ProcessRequestId::starting_after(X_REQUEST_ID, MAX_REQUEST_ID - 5);
        let (parts, ()) = Request::new(()).into_parts();

        let ids = (0..10)
            .map(|_| make.make_request_id(&parts).1.unwrap().to_string())
            .collect::<HashSet<_>>();

        assert_eq!(ids.len(), 10);
        assert!(ids.contains(&format!("{}-{}", make.prefix(), MAX_REQUEST_ID)));
        assert!(ids.contains(&format!("{}-1", make.prefix())));
    }

    #[tokio::test]
    async fn replaces_empty_header() {
        let make = ProcessRequestId::x_request_id();
        let prefix = make.prefix().to_owned();
        let svc = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(make))
            .service_fn(echo_id);

        let req = Request::builder().header("x-request-id", "").body(()).unwrap();
        let res = svc.oneshot(req).await.unwrap();

        assert_eq!(res.body(), &format!("{prefix}-1"));
    }

    #[test]
    fn prefix_shape() {
        let make = ProcessRequestId::x_request_id();
        let (host, salt) = make.prefix().rsplit_once('/').unwrap();

        assert!(!host.is_empty());
        assert!(host.chars().all(|c| c.is_ascii_graphic()));
        assert_eq!(salt.len(), 16);
        assert!(salt
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn counter_wraps_after_max() {
        let make = ProcessRequestId::starting_after(X_REQUEST_ID, MAX_REQUEST_ID - 1);
        assert_eq!(make.next_counter(), MAX_REQUEST_ID);
        assert_eq!(make.next_counter(), 1);
        assert_eq!(make.next_counter(), 2);
    }

    #[test]
    fn clones_share_the_counter_across_threads() {
        let make = ProcessRequestId::x_request_id();

        let handles = (0..4)
            .map(|_| {
                let make = make.clone();
                std::thread::spawn(move || (0..250).map(|_| make.next_counter()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();

        let ids = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect::<HashSet<_>>();

        assert_eq!(ids.len(), 1000);
    }
}
