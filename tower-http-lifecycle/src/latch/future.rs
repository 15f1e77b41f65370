use super::{OnSettle, SettleBody, SettleGuard};
use http::{Method, Response};
use http_body::Body;
use pin_project_lite::pin_project;
use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

pin_project! {
    /// Response future that hands its guard on to the response body.
    ///
    /// The guard settles as finished when the inner future fails or the
    /// response body is already empty or never sent. Otherwise it travels with the body in a
    /// [`SettleBody`]. Dropping this future before it resolves settles the
    /// guard as closed.
    pub struct SettleFuture<F, N>
    where
        N: OnSettle,
    {
        // Declared before `guard` so the inner future is dropped first.
        #[pin]
        inner: F,
        guard: Option<SettleGuard<N>>,
        head: bool,
    }
}

impl<F, N> SettleFuture<F, N>
where
    N: OnSettle,
{
    pub(crate) fn new(inner: F, method: &Method, guard: Option<SettleGuard<N>>) -> Self {
        Self {
            inner,
            guard,
            head: *method == Method::HEAD,
        }
    }
}

impl<F, N, B, E> Future for SettleFuture<F, N>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    N: OnSettle,
{
    type Output = Result<Response<SettleBody<B, N>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        let guard = this.guard.take();

        match result {
            Ok(response) => {
                let response = SettleBody::wrap_response(response, guard, *this.head);
                Poll::Ready(Ok(response))
            }
            Err(err) => {
                if let Some(guard) = guard {
                    guard.finish();
                }
                Poll::Ready(Err(err))
            }
        }
    }
}
