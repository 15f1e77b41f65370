use crate::{error_handler::HttpError, BoxError};
use std::{error::Error, fmt};

/// The request's client went away, so the work for it was abandoned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestClosed(());

impl RequestClosed {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

impl fmt::Display for RequestClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("request closed")
    }
}

impl Error for RequestClosed {}

/// Error type for handlers that observe [`RequestClosed`].
///
/// Use `?` on [`ensure_running`](super::ensure_running) and wrap everything else
/// with [`RequestError::failed`].
#[derive(Debug)]
pub enum RequestError {
    /// The request was closed by its client.
    Closed(RequestClosed),
    /// Any other failure.
    Failed(BoxError),
}

impl RequestError {
    /// Wrap any other failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Failed(err.into())
    }

    /// Whether the request was closed by its client.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl From<RequestClosed> for RequestError {
    fn from(closed: RequestClosed) -> Self {
        Self::Closed(closed)
    }
}

impl From<HttpError> for RequestError {
    fn from(err: HttpError) -> Self {
        Self::failed(err)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(closed) => closed.fmt(f),
            Self::Failed(err) => err.fmt(f),
        }
    }
}

impl Error for RequestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Closed(_) => None,
            Self::Failed(err) => Some(&**err),
        }
    }
}
