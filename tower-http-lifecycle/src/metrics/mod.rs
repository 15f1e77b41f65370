//! Request count and duration metrics.
//!
//! [`RequestMetricsLayer`] reports every request to a [`MetricsSink`] once, when
//! the response finishes or the request is aborted. Requests are labelled with
//! their method, a normalised path and a status class (`2xx`, `3xx`, `4xx` or
//! `5xx`). The path label is the first matching entry of
//! [`MetricsOptions::path_patterns`], or the request path itself.
//!
//! # Example
//!
//! ```
//! use http::{Request, Response};
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_http_lifecycle::metrics::{
//!     MetricsOptions, MetricsSink, RequestLabels, RequestMetricsLayer,
//! };
//! use std::{convert::Infallible, sync::atomic::{AtomicU64, Ordering}};
//!
//! #[derive(Default)]
//! struct Counter(AtomicU64);
//!
//! impl MetricsSink for Counter {
//!     fn increment_requests(&self, _labels: &RequestLabels) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn observe_duration_ms(&self, _labels: &RequestLabels, _duration_ms: f64) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let options = MetricsOptions::new()
//!     .path_patterns(["/users/:id"])
//!     .ignored_paths(["/healthz"]);
//!
//! let svc = ServiceBuilder::new()
//!     .layer(RequestMetricsLayer::with_options(Counter::default(), options))
//!     .service_fn(|_req: Request<String>| async {
//!         Ok::<_, Infallible>(Response::new(String::new()))
//!     });
//!
//! let _res = svc.oneshot(Request::new(String::new())).await.unwrap();
//! # }
//! ```

mod layer;
mod path;
mod sink;

pub use self::{
    layer::{RecordMetrics, RequestMetrics, RequestMetricsLayer, ResponseBody, ResponseFuture},
    path::PathPatterns,
    sink::{MetricsSink, RequestLabels, StatusClass, REQUESTS_TOTAL, REQUEST_DURATION_MS},
};

/// Histogram buckets, in milliseconds, used unless configured otherwise.
pub const DEFAULT_DURATION_BUCKETS: [f64; 4] = [10.0, 100.0, 1000.0, 2000.0];

/// Configuration for [`RequestMetricsLayer`].
#[derive(Debug, Clone)]
pub struct MetricsOptions {
    path_patterns: Vec<String>,
    ignored_paths: Vec<String>,
    duration_buckets: Vec<f64>,
}

impl MetricsOptions {
    /// Default options: the default duration buckets and nothing else.
    pub fn new() -> Self {
        Self {
            path_patterns: Vec::new(),
            ignored_paths: Vec::new(),
            duration_buckets: DEFAULT_DURATION_BUCKETS.to_vec(),
        }
    }

    /// Patterns like `/users/:id` or `/files/*` used as path labels.
    ///
    /// The first matching pattern wins.
    pub fn path_patterns<I, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.path_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Normalised paths that are not measured at all.
    pub fn ignored_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.ignored_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Histogram buckets in milliseconds, handed to [`MetricsSink::describe`].
    pub fn duration_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.duration_buckets = buckets;
        self
    }
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self::new()
    }
}
