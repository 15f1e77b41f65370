use super::{OnSettle, SettleGuard};
use http::{Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::{
    fmt,
    pin::Pin,
    task::{ready, Context, Poll},
};

pin_project! {
    /// Response body that settles its guard at end of stream.
    ///
    /// A body error also counts as finished: the client did not go away.
    /// Dropping the body earlier settles the guard as closed.
    pub struct SettleBody<B, N>
    where
        N: OnSettle,
    {
        #[pin]
        inner: B,
        guard: Option<SettleGuard<N>>,
    }
}

impl<B, N> SettleBody<B, N>
where
    B: Body,
    N: OnSettle,
{
    /// Wrap `response`, recording its head on the guard.
    ///
    /// The guard finishes right away when the body is already empty or will
    /// never be sent: responses to `HEAD` and `1xx`, `204` or `304` responses.
    pub(crate) fn wrap_response(
        response: Response<B>,
        mut guard: Option<SettleGuard<N>>,
        head: bool,
    ) -> Response<Self> {
        if let Some(guard) = guard.as_mut() {
            guard.on_response(&response);
        }

        if head || is_bodiless(response.status()) || response.body().is_end_stream() {
            if let Some(guard) = guard.take() {
                guard.finish();
            }
        }

        response.map(|inner| Self { inner, guard })
    }
}

impl<B, N> Body for SettleBody<B, N>
where
    B: Body,
    N: OnSettle,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let result = ready!(this.inner.as_mut().poll_frame(cx));

        let finished = match &result {
            None | Some(Err(_)) => true,
            Some(Ok(_)) => this.inner.is_end_stream(),
        };
        if finished {
            if let Some(guard) = this.guard.take() {
                guard.finish();
            }
        }

        Poll::Ready(result)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

// Hyper writes the head of these and drops the body unpolled.
fn is_bodiless(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

impl<B, N> fmt::Debug for SettleBody<B, N>
where
    B: fmt::Debug,
    N: OnSettle,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettleBody")
            .field("inner", &self.inner)
            .field("settled", &self.guard.is_none())
            .finish()
    }
}

impl<B, N> Default for SettleBody<B, N>
where
    B: Default,
    N: OnSettle,
{
    fn default() -> Self {
        Self {
            inner: B::default(),
            guard: None,
        }
    }
}
