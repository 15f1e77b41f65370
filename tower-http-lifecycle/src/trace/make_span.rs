use super::DEFAULT_MESSAGE_LEVEL;
use crate::request_id::RequestId;
use http::{header, HeaderMap, Request};
use tracing::{field::Empty, Level, Span};

/// Headers that never end up in a request span.
const REDACTED_HEADERS: [header::HeaderName; 3] =
    [header::AUTHORIZATION, header::COOKIE, header::HOST];

/// Trait used to generate [`Span`]s from requests.
pub trait MakeSpan<B> {
    /// Make a span from a request.
    fn make_span(&mut self, request: &Request<B>) -> Span;
}

impl<B> MakeSpan<B> for Span {
    fn make_span(&mut self, _request: &Request<B>) -> Span {
        self.clone()
    }
}

impl<F, B> MakeSpan<B> for F
where
    F: FnMut(&Request<B>) -> Span,
{
    fn make_span(&mut self, request: &Request<B>) -> Span {
        self(request)
    }
}

/// The default way [`Span`]s will be created for [`RequestSpan`].
///
/// [`RequestSpan`]: super::RequestSpan
#[derive(Debug, Clone)]
pub struct DefaultMakeSpan {
    level: Level,
    include_headers: bool,
}

impl DefaultMakeSpan {
    /// Create a new `DefaultMakeSpan`.
    pub fn new() -> Self {
        Self {
            level: DEFAULT_MESSAGE_LEVEL,
            include_headers: false,
        }
    }

    /// Set the [`Level`] used for the span.
    ///
    /// Defaults to [`Level::DEBUG`].
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Record request headers on the span, leaving out `authorization`,
    /// `cookie` and `host`.
    ///
    /// Defaults to `false`.
    pub fn include_headers(mut self, include_headers: bool) -> Self {
        self.include_headers = include_headers;
        self
    }
}

impl Default for DefaultMakeSpan {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> MakeSpan<B> for DefaultMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = RequestId::from_request(request);
        let request_id = request_id.as_ref().and_then(RequestId::to_str);

        // This ugly macro is needed, unfortunately, because `tracing::span!`
        // requires the level argument to be static.
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    headers = Empty,
                )
            };
        }

        let span = match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        };

        if self.include_headers {
            span.record("headers", tracing::field::debug(loggable_headers(request.headers())));
        }

        span
    }
}

fn loggable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    for name in &REDACTED_HEADERS {
        headers.remove(name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_headers_are_left_out() {
        let req = Request::builder()
            .header("authorization", "Bearer secret")
            .header("cookie", "session=1")
            .header("host", "example.com")
            .header("accept", "text/html")
            .body(())
            .unwrap();

        let headers = loggable_headers(req.headers());

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["accept"], "text/html");
    }
}
