use crate::BoxError;
use std::{error::Error, fmt, io, sync::Arc};
use tokio::task::JoinError;

/// Errors from starting or stopping a server.
///
/// Every caller of an idempotent stop receives the same outcome, so the error
/// is cheap to clone.
#[derive(Debug, Clone)]
pub enum LifecycleError {
    /// The listening socket could not be bound.
    Bind { port: u16, source: Arc<io::Error> },
    /// A start or shutdown hook failed.
    Hook(Arc<dyn Error + Send + Sync>),
    /// Listening for process signals could not be set up.
    Signal(Arc<io::Error>),
    /// The accept loop task panicked or was cancelled.
    TaskFailed(Arc<JoinError>),
}

impl LifecycleError {
    pub(crate) fn bind(port: u16, source: io::Error) -> Self {
        Self::Bind {
            port,
            source: Arc::new(source),
        }
    }

    pub(crate) fn hook(err: BoxError) -> Self {
        Self::Hook(Arc::from(err))
    }

    pub(crate) fn signal(err: io::Error) -> Self {
        Self::Signal(Arc::new(err))
    }

    pub(crate) fn task_failed(err: JoinError) -> Self {
        Self::TaskFailed(Arc::new(err))
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { port, .. } => write!(f, "failed to bind port {port}"),
            Self::Hook(_) => f.write_str("lifecycle hook failed"),
            Self::Signal(_) => f.write_str("failed to listen for process signals"),
            Self::TaskFailed(_) => f.write_str("server task failed"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(&**source),
            Self::Hook(err) => Some(&**err),
            Self::Signal(err) => Some(&**err),
            Self::TaskFailed(err) => Some(&**err),
        }
    }
}
