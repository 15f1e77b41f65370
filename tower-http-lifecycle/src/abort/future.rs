use super::{AbortPolicy, HandlerCancelled};
use crate::{
    latch::{OnSettle, SettleBody, SettleGuard, Settled},
    scope::{Outcome, RequestScope},
    BoxError,
};
use http::Response;
use pin_project_lite::pin_project;
use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::task::JoinHandle;
use tracing::{Level, Span};

/// Response body for [`DetectAbort`](super::DetectAbort).
pub type ResponseBody<B> = SettleBody<B, AbortNotifier>;

/// Settles a request's abort outcome.
#[derive(Debug)]
pub struct AbortNotifier {
    pub(super) scope: RequestScope,
    pub(super) level: Level,
    pub(super) policy: AbortPolicy,
    pub(super) span: Span,
}

impl OnSettle for AbortNotifier {
    fn on_response<B>(&mut self, response: &Response<B>) {
        if !self.scope.is_aborted() {
            self.scope.record_status(response.status());
        }
    }

    fn on_settle(self, settled: Settled) {
        match settled {
            Settled::Finished => {
                self.scope.settle(Outcome::Completed);
            }
            Settled::Closed => {
                if !self.scope.settle(Outcome::Aborted) {
                    return;
                }
                if let AbortPolicy::ForceStatus(status) = self.policy {
                    self.scope.record_status(status);
                }
                let _entered = self.span.enter();
                event_dynamic_lvl!(
                    self.level,
                    status = self.scope.status().map(|status| status.as_u16()),
                    "request seems to have been aborted by the client"
                );
            }
        }
    }
}

pin_project! {
    /// Response future for [`DetectAbort`](super::DetectAbort).
    pub struct ResponseFuture<B> {
        task: JoinHandle<Result<Response<B>, BoxError>>,
        guard: Option<SettleGuard<AbortNotifier>>,
        head: bool,
    }
}

impl<B> ResponseFuture<B> {
    pub(super) fn new(
        task: JoinHandle<Result<Response<B>, BoxError>>,
        guard: SettleGuard<AbortNotifier>,
        head: bool,
    ) -> Self {
        Self {
            task,
            guard: Some(guard),
            head,
        }
    }
}

impl<B> Future for ResponseFuture<B>
where
    B: http_body::Body,
{
    type Output = Result<Response<ResponseBody<B>>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let joined = ready!(Pin::new(this.task).poll(cx));
        let guard = this.guard.take();

        match joined {
            Ok(Ok(response)) => {
                let response = SettleBody::wrap_response(response, guard, *this.head);
                Poll::Ready(Ok(response))
            }
            Ok(Err(err)) => {
                if let Some(guard) = guard {
                    guard.finish();
                }
                Poll::Ready(Err(err))
            }
            Err(join_error) => {
                if let Some(guard) = guard {
                    guard.finish();
                }
                match join_error.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(_) => Poll::Ready(Err(Box::new(HandlerCancelled::new()))),
                }
            }
        }
    }
}
