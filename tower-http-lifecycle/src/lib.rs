//! `async fn(HttpRequest) -> Result<HttpResponse, Error>`, and what happens around it.
//!
//! # Overview
//!
//! tower-http-lifecycle is a collection of HTTP middleware and a small server that keep track of
//! a request from the moment it arrives until its response is fully written, or until the client
//! goes away. It is built on [`http`], [`http-body`], [`tower`] and [`hyper`].
//!
//! The pieces share one [`RequestScope`](scope::RequestScope) per request, stored in the request
//! extensions. Each middleware writes what it knows into it and later middleware and handlers
//! read from it:
//!
//! - [`request_id`] adopts or generates an `x-request-id`.
//! - [`trace`] runs the request inside a span and logs when it starts and finishes.
//! - [`metrics`] reports request counts and durations to a [`MetricsSink`](metrics::MetricsSink).
//! - [`abort`] notices clients that disconnect before the response is done.
//! - [`context`] hands handlers a [`RequestContext`](context::RequestContext) they can poll with
//!   [`ensure_running`](context::ensure_running) to stop working on abandoned requests.
//! - [`error_handler`] turns errors into responses.
//! - [`server`] serves a stack like this and shuts it down gracefully on SIGINT or SIGTERM.
//!
//! # Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use hyper::body::Incoming;
//! use std::time::Duration;
//! use tower::ServiceBuilder;
//! use tower_http_lifecycle::{
//!     context::{ensure_running, request_context, BaseContext, RequestError},
//!     server::{manage_lifecycle, LifecycleConfig},
//!     ServiceBuilderExt,
//! };
//!
//! async fn handle(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, RequestError> {
//!     let context = request_context::<BaseContext, _>(&request);
//!     for _ in 0..10 {
//!         // bail out if the client is gone
//!         ensure_running(context.as_deref())?;
//!         tokio::time::sleep(Duration::from_millis(100)).await;
//!     }
//!     Ok(Response::new(Full::from("done")))
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ServiceBuilder::new()
//!     .set_x_request_id()
//!     .request_span()
//!     .log_requests()
//!     .detect_aborts()
//!     .base_context()
//!     .handle_errors()
//!     .handle_request_closed::<BaseContext>()
//!     .service_fn(handle);
//!
//! let lifecycle = manage_lifecycle(service, 3000, LifecycleConfig::default()).await?;
//! lifecycle.stopped().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - `server`: the [`server`] module, which pulls in [`hyper`] and [`hyper-util`].
//! - `util`: the [`ServiceBuilderExt`] trait, which pulls in [`tower`].
//!
//! Both are enabled by default.
//!
//! [`http`]: https://crates.io/crates/http
//! [`http-body`]: https://crates.io/crates/http-body
//! [`hyper`]: https://crates.io/crates/hyper
//! [`hyper-util`]: https://crates.io/crates/hyper-util
//! [`tower`]: https://crates.io/crates/tower

#![allow(elided_lifetimes_in_paths, clippy::type_complexity)]
#![warn(
    clippy::all,
    clippy::dbg_macro,
    clippy::todo,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::mismatched_target_os,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style,
    missing_debug_implementations,
    unreachable_pub
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(test, allow(clippy::float_cmp))]

#[macro_use]
pub(crate) mod macros;

#[cfg(test)]
mod test_helpers;

pub mod abort;
pub mod context;
pub mod error_handler;
pub mod latch;
pub mod metrics;
pub mod request_id;
pub mod scope;
pub mod trace;

#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

#[cfg(feature = "util")]
mod builder;

#[cfg(feature = "util")]
#[cfg_attr(docsrs, doc(cfg(feature = "util")))]
#[doc(inline)]
pub use self::builder::ServiceBuilderExt;

/// Alias for a type-erased error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

mod sealed {
    #[allow(unreachable_pub, unused)]
    pub trait Sealed<T> {}
}
