use http::Response;

/// How a guarded request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// The response future failed, or the response body reached its end.
    Finished,
    /// The response future or body was dropped before finishing.
    Closed,
}

/// Callback invoked once by a [`SettleGuard`].
///
/// `on_response` is called when the guarded future yields a response, before
/// the body is polled. It may be called at most once and never after
/// `on_settle`.
pub trait OnSettle: Sized {
    /// Observe the response head.
    fn on_response<B>(&mut self, _response: &Response<B>) {}

    /// Handle the terminal event.
    fn on_settle(self, settled: Settled);
}

impl<F> OnSettle for F
where
    F: FnOnce(Settled),
{
    fn on_settle(self, settled: Settled) {
        self(settled)
    }
}

/// Runs its callback exactly once: with [`Settled::Finished`] when
/// [`finish`](SettleGuard::finish) is called, or with [`Settled::Closed`]
/// when dropped unfinished.
///
/// # Example
///
/// ```
/// use tower_http_lifecycle::latch::{SettleGuard, Settled};
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let recorder = seen.clone();
/// let guard = SettleGuard::new(move |settled: Settled| recorder.lock().unwrap().push(settled));
/// drop(guard);
///
/// let recorder = seen.clone();
/// let guard = SettleGuard::new(move |settled: Settled| recorder.lock().unwrap().push(settled));
/// guard.finish();
///
/// assert_eq!(*seen.lock().unwrap(), vec![Settled::Closed, Settled::Finished]);
/// ```
#[derive(Debug)]
pub struct SettleGuard<N>
where
    N: OnSettle,
{
    callback: Option<N>,
}

impl<N> SettleGuard<N>
where
    N: OnSettle,
{
    /// Create a guard that will run `callback`.
    pub fn new(callback: N) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// Settle as finished.
    pub fn finish(mut self) {
        if let Some(callback) = self.callback.take() {
            callback.on_settle(Settled::Finished);
        }
    }

    pub(crate) fn on_response<B>(&mut self, response: &Response<B>) {
        if let Some(callback) = self.callback.as_mut() {
            callback.on_response(response);
        }
    }
}

impl<N> Drop for SettleGuard<N>
where
    N: OnSettle,
{
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback.on_settle(Settled::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn drop_settles_closed() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = seen.clone();

        {
            let _guard = SettleGuard::new(move |settled: Settled| recorder.borrow_mut().push(settled));
        }

        assert_eq!(*seen.borrow(), vec![Settled::Closed]);
    }

    #[test]
    fn finish_settles_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = seen.clone();

        let guard = SettleGuard::new(move |settled: Settled| recorder.borrow_mut().push(settled));
        guard.finish();

        assert_eq!(*seen.borrow(), vec![Settled::Finished]);
    }

    struct StatusRecorder {
        status: Option<u16>,
        out: Rc<RefCell<Option<(Option<u16>, Settled)>>>,
    }

    impl OnSettle for StatusRecorder {
        fn on_response<B>(&mut self, response: &Response<B>) {
            self.status = Some(response.status().as_u16());
        }

        fn on_settle(self, settled: Settled) {
            *self.out.borrow_mut() = Some((self.status, settled));
        }
    }

    #[test]
    fn response_head_is_visible_when_settling() {
        let out = Rc::new(RefCell::new(None));
        let mut guard = SettleGuard::new(StatusRecorder {
            status: None,
            out: out.clone(),
        });

        let response = Response::builder().status(204).body(()).unwrap();
        guard.on_response(&response);
        drop(guard);

        assert_eq!(*out.borrow(), Some((Some(204), Settled::Closed)));
    }
}
