use super::{AbortPolicy, DetectAbort};
use tower_layer::Layer;
use tracing::Level;

/// [`Layer`] that applies [`DetectAbort`].
///
/// See the [module docs](crate::abort) for more details.
#[derive(Debug, Clone, Copy)]
pub struct DetectAbortLayer {
    level: Level,
    policy: AbortPolicy,
}

impl DetectAbortLayer {
    /// Detect aborts, logging them at `DEBUG` and recording a `400 Bad Request`
    /// status.
    pub fn new() -> Self {
        Self {
            level: Level::DEBUG,
            policy: AbortPolicy::default(),
        }
    }

    /// Set the level the abort line is logged at.
    ///
    /// Defaults to [`Level::DEBUG`].
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set what gets recorded for an aborted request.
    ///
    /// Defaults to [`AbortPolicy::ForceStatus`] with `400 Bad Request`.
    pub fn policy(mut self, policy: AbortPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for DetectAbortLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for DetectAbortLayer {
    type Service = DetectAbort<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DetectAbort::new(inner, self.level, self.policy)
    }
}
