use http::{Method, StatusCode};
use std::{fmt, sync::Arc};

/// Name of the request counter.
pub const REQUESTS_TOTAL: &str = "http_requests_total";

/// Name of the request duration histogram.
pub const REQUEST_DURATION_MS: &str = "http_request_duration_ms";

/// Receives request metrics from [`RequestMetrics`].
///
/// Implement this on top of whatever metrics registry the application uses.
/// The metric names it is expected to use are [`REQUESTS_TOTAL`] and
/// [`REQUEST_DURATION_MS`].
///
/// [`RequestMetrics`]: super::RequestMetrics
pub trait MetricsSink: Send + Sync + 'static {
    /// Called once when the layer is created, with the configured histogram
    /// buckets.
    ///
    /// The default implementation does nothing.
    #[inline]
    #[allow(unused_variables)]
    fn describe(&self, duration_buckets_ms: &[f64]) {}

    /// Count one finished request.
    fn increment_requests(&self, labels: &RequestLabels);

    /// Record how long a request took.
    fn observe_duration_ms(&self, labels: &RequestLabels, duration_ms: f64);
}

impl<T> MetricsSink for Arc<T>
where
    T: MetricsSink + ?Sized,
{
    fn describe(&self, duration_buckets_ms: &[f64]) {
        (**self).describe(duration_buckets_ms)
    }

    fn increment_requests(&self, labels: &RequestLabels) {
        (**self).increment_requests(labels)
    }

    fn observe_duration_ms(&self, labels: &RequestLabels, duration_ms: f64) {
        (**self).observe_duration_ms(labels, duration_ms)
    }
}

/// Status of a response, reduced to its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    Redirection,
    ClientError,
    /// Also used for anything outside `200..500`.
    ServerError,
}

impl StatusClass {
    /// Classify `status`.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => Self::Success,
            300..=399 => Self::Redirection,
            400..=499 => Self::ClientError,
            _ => Self::ServerError,
        }
    }

    /// The label value, such as `"2xx"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "2xx",
            Self::Redirection => "3xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels attached to every observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLabels {
    method: Method,
    path: String,
    status: StatusClass,
}

impl RequestLabels {
    pub(crate) fn new(method: Method, path: String, status: StatusClass) -> Self {
        Self {
            method,
            path,
            status,
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The normalised path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The class of the response status.
    pub fn status(&self) -> StatusClass {
        self.status
    }
}
