//! Per-request state shared between middleware.
//!
//! Every middleware in this crate reads and writes a [`RequestScope`] stored in
//! the request extensions. The first middleware to need it creates it. The
//! scope is reference counted, so futures and bodies can hold on to it after
//! the request itself has been handed to the next service.

use crate::{latch::Latch, request_id::RequestId};
use http::{Extensions, Request, StatusCode};
use once_cell::sync::OnceCell;
use std::{
    any::Any,
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tracing::Span;

/// How a request ended, as seen from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The response was produced and fully handed over.
    Completed,
    /// The connection went away before the response finished.
    Aborted,
}

/// Shared per-request side table.
#[derive(Clone, Default)]
pub struct RequestScope {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    outcome: Latch<Outcome>,
    // 0 means no status recorded.
    status: AtomicU16,
    request_id: OnceCell<RequestId>,
    span: OnceCell<Span>,
    context: OnceCell<Arc<dyn Any + Send + Sync>>,
    statistics: Mutex<BTreeMap<Cow<'static, str>, u64>>,
}

impl RequestScope {
    /// Create a fresh scope that is not attached to any request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the scope of `request`, if some middleware created one.
    pub fn from_request<B>(request: &Request<B>) -> Option<Self> {
        Self::from_extensions(request.extensions())
    }

    /// Get the scope stored in `extensions`, if any.
    pub fn from_extensions(extensions: &Extensions) -> Option<Self> {
        extensions.get::<Self>().cloned()
    }

    /// Get the scope stored in `extensions`, creating and storing one if
    /// there is none yet.
    pub fn get_or_insert(extensions: &mut Extensions) -> Self {
        if let Some(scope) = extensions.get::<Self>() {
            return scope.clone();
        }
        let scope = Self::new();
        extensions.insert(scope.clone());
        scope
    }

    /// The settled transport outcome, if the request passed through abort
    /// detection and has ended.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.outcome.get().copied()
    }

    /// Whether the client went away before the response finished.
    pub fn is_aborted(&self) -> bool {
        self.outcome() == Some(Outcome::Aborted)
    }

    /// Settle the outcome. Returns `false` if it was already settled.
    pub fn settle(&self, outcome: Outcome) -> bool {
        self.inner.outcome.settle(outcome)
    }

    /// The terminal status recorded for this request.
    ///
    /// This is the response status once a response was produced, or the status
    /// forced by abort detection.
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.status.load(Ordering::Acquire) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }

    /// Record the terminal status, replacing any previous one.
    pub fn record_status(&self, status: StatusCode) {
        self.inner.status.store(status.as_u16(), Ordering::Release);
    }

    /// Record `status` unless a status is already present.
    pub(crate) fn record_status_if_unset(&self, status: StatusCode) {
        let _ = self.inner.status.compare_exchange(
            0,
            status.as_u16(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// The request id, if one was set.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.inner.request_id.get()
    }

    pub(crate) fn set_request_id(&self, id: RequestId) {
        let _ = self.inner.request_id.set(id);
    }

    /// The request span, if one was created.
    pub fn span(&self) -> Option<&Span> {
        self.inner.span.get()
    }

    /// Store `span` as the request span. Returns `false` if a span is already
    /// stored.
    pub(crate) fn set_span(&self, span: Span) -> bool {
        self.inner.span.set(span).is_ok()
    }

    /// The request context, if one of type `C` was attached.
    pub fn context<C>(&self) -> Option<Arc<C>>
    where
        C: Send + Sync + 'static,
    {
        let context = self.inner.context.get()?.clone();
        context.downcast::<C>().ok()
    }

    /// Get the context, building it with `make` if none is attached yet.
    ///
    /// A scope holds one context. If a context of another type is already
    /// attached this returns `None` and `make` is not called.
    pub(crate) fn context_or_init<C, F>(&self, make: F) -> Option<Arc<C>>
    where
        C: Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        let context = self
            .inner
            .context
            .get_or_init(|| Arc::new(make()) as Arc<dyn Any + Send + Sync>)
            .clone();
        context.downcast::<C>().ok()
    }

    /// Set the named statistic to `value`, replacing any earlier value.
    pub fn add_statistic<K>(&self, key: K, value: u64)
    where
        K: Into<Cow<'static, str>>,
    {
        let mut statistics = self
            .inner
            .statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        statistics.insert(key.into(), value);
    }

    /// A snapshot of the recorded statistics.
    pub fn statistics(&self) -> BTreeMap<Cow<'static, str>, u64> {
        self.inner
            .statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("outcome", &self.outcome())
            .field("status", &self.status())
            .field("request_id", &self.request_id())
            .field("has_context", &self.inner.context.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_reuses_existing_scope() {
        let mut req = Request::new(());
        let first = RequestScope::get_or_insert(req.extensions_mut());
        first.add_statistic("rows", 3);
        first.add_statistic("hits", 1);

        let second = RequestScope::get_or_insert(req.extensions_mut());
        second.add_statistic("rows", 2);

        let stored = RequestScope::from_request(&req).unwrap();
        assert_eq!(stored.statistics().get("rows"), Some(&2));
        assert_eq!(stored.statistics().get("hits"), Some(&1));
    }

    #[test]
    fn outcome_is_write_once() {
        let scope = RequestScope::new();
        assert_eq!(scope.outcome(), None);
        assert!(!scope.is_aborted());

        assert!(scope.settle(Outcome::Aborted));
        assert!(!scope.settle(Outcome::Completed));
        assert!(scope.is_aborted());
    }

    #[test]
    fn status_recording() {
        let scope = RequestScope::new();
        assert_eq!(scope.status(), None);

        scope.record_status_if_unset(StatusCode::OK);
        scope.record_status_if_unset(StatusCode::NOT_FOUND);
        assert_eq!(scope.status(), Some(StatusCode::OK));

        scope.record_status(StatusCode::BAD_REQUEST);
        assert_eq!(scope.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn context_is_built_once_and_typed() {
        let scope = RequestScope::new();
        let mut calls = 0;

        let first = scope.context_or_init(|| {
            calls += 1;
            String::from("ctx")
        });
        let second = scope.context_or_init(|| {
            calls += 1;
            String::from("other")
        });

        assert_eq!(calls, 1);
        assert_eq!(first.as_deref().map(String::as_str), Some("ctx"));
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));

        assert!(scope.context::<u32>().is_none());
        assert!(scope.context_or_init(|| 1_u32).is_none());
        assert_eq!(scope.context::<String>().unwrap().as_str(), "ctx");
    }

    #[test]
    fn clones_share_state() {
        let scope = RequestScope::new();
        let clone = scope.clone();
        clone.record_status(StatusCode::CREATED);
        assert_eq!(scope.status(), Some(StatusCode::CREATED));
    }
}
