//! Serve a tower service over HTTP/1 and shut it down gracefully.
//!
//! [`start`] binds a port and serves every connection with hyper.
//! [`Server::stop`] stops accepting, lets in-flight requests finish within the
//! keep-alive grace period and then closes whatever is left.
//!
//! [`manage_lifecycle`] additionally listens for process signals. On SIGINT it
//! shuts down right away. On SIGTERM it first waits for the deregistration
//! period, so a load balancer has time to stop sending traffic to the
//! instance.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use hyper::body::Incoming;
//! use tower::ServiceBuilder;
//! use tower_http_lifecycle::{
//!     request_id::SetRequestIdLayer,
//!     server::{manage_lifecycle, LifecycleConfig},
//! };
//! use std::{convert::Infallible, time::Duration};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ServiceBuilder::new()
//!     .layer(SetRequestIdLayer::x_request_id())
//!     .service_fn(|_req: Request<Incoming>| async {
//!         Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"hello"))))
//!     });
//!
//! let config = LifecycleConfig::default()
//!     .wait_for_deregistration_period(Duration::from_secs(5))
//!     .on_shutdown(|| async {
//!         // close database pools and the like
//!         Ok(())
//!     });
//!
//! let lifecycle = manage_lifecycle(service, 8080, config).await?;
//! let report = lifecycle.stopped().await?;
//! println!("stopped, graceful: {}", report.graceful);
//! # Ok(())
//! # }
//! ```

mod error;
mod lifecycle;
mod signal;

pub use self::{
    error::LifecycleError,
    lifecycle::{manage_lifecycle, manage_lifecycle_with_signals, Lifecycle, LifecycleConfig},
    signal::{os_signals, Signal},
};

use crate::{latch::Latch, BoxError};
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body::Body;
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown, service::TowerToHyperService};
use std::{
    error::Error as _,
    fmt,
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::{watch, Notify},
    task::{JoinHandle, JoinSet},
};
use tower_service::Service;

/// Default time in-flight connections get to finish once a stop begins.
pub const DEFAULT_KEEP_ALIVE_GRACE_PERIOD: Duration = Duration::from_millis(3000);

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// An async callback run when a server starts or stops.
pub type Hook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Box an async closure into a [`Hook`].
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, Result<(), BoxError>> { Box::pin(f()) })
}

/// How a stop went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct StopReport {
    /// `false` if connections were still open when the grace period ran out
    /// and had to be closed.
    pub graceful: bool,
}

/// Handle to a running server.
///
/// Clones refer to the same server. Dropping every handle stops it the same
/// way [`Server::stop`] does, without running a shutdown hook.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

struct Shared {
    local_addr: SocketAddr,
    stopping: AtomicBool,
    stop_tx: watch::Sender<bool>,
    accept_loop: Mutex<Option<JoinHandle<StopReport>>>,
    outcome: Latch<Result<StopReport, LifecycleError>>,
    stopped: Notify,
}

/// Bind `0.0.0.0:port` and start serving `service`.
///
/// Port `0` picks a free port, see [`Server::local_addr`]. `on_start` runs
/// once the listener is bound. If it fails the server is stopped again and the
/// hook's error is returned.
pub async fn start<S, B>(
    service: S,
    port: u16,
    keep_alive_grace_period: Duration,
    on_start: Option<Hook>,
) -> Result<Server, LifecycleError>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .map_err(|err| LifecycleError::bind(port, err))?;
    let local_addr = listener
        .local_addr()
        .map_err(|err| LifecycleError::bind(port, err))?;

    tracing::info!("server listening on port {}", local_addr.port());

    let (stop_tx, stop_rx) = watch::channel(false);
    let accept_loop = tokio::spawn(serve(listener, service, stop_rx, keep_alive_grace_period));

    let server = Server {
        shared: Arc::new(Shared {
            local_addr,
            stopping: AtomicBool::new(false),
            stop_tx,
            accept_loop: Mutex::new(Some(accept_loop)),
            outcome: Latch::new(),
            stopped: Notify::new(),
        }),
    };

    if let Some(on_start) = on_start {
        if let Err(err) = on_start().await {
            tracing::error!(error = %err, "start hook failed");
            let _ = server.stop(None).await;
            return Err(LifecycleError::hook(err));
        }
    }

    Ok(server)
}

impl Server {
    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Whether a stop has begun.
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Stop the server and run `on_shutdown` afterwards.
    ///
    /// Only the first call stops the server and runs its hook. Every call,
    /// including concurrent ones, resolves to the outcome of that first stop.
    ///
    /// The stop runs on its own task. Dropping the returned future does not
    /// interrupt it.
    pub async fn stop(&self, on_shutdown: Option<Hook>) -> Result<StopReport, LifecycleError> {
        self.begin_stop(|| on_shutdown);
        self.stopped().await
    }

    /// Wait until a stop has completed and return its outcome.
    pub async fn stopped(&self) -> Result<StopReport, LifecycleError> {
        loop {
            let notified = self.shared.stopped.notified();
            if let Some(outcome) = self.shared.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    /// Spawn the stop task unless a stop has already begun.
    ///
    /// `on_shutdown` is only called when this call begins the stop.
    pub(crate) fn begin_stop<F>(&self, on_shutdown: F)
    where
        F: FnOnce() -> Option<Hook>,
    {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = self.shared.clone();
        let on_shutdown = on_shutdown();
        tokio::spawn(async move {
            let outcome = match tokio::spawn(shut_down(shared.clone(), on_shutdown)).await {
                Ok(outcome) => outcome,
                Err(err) => Err(LifecycleError::task_failed(err)),
            };
            shared.outcome.settle(outcome);
            shared.stopped.notify_waiters();
        });
    }
}

async fn shut_down(
    shared: Arc<Shared>,
    on_shutdown: Option<Hook>,
) -> Result<StopReport, LifecycleError> {
    tracing::info!("shutting down server");

    shared.stop_tx.send_replace(true);
    let accept_loop = shared
        .accept_loop
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let report = match accept_loop {
        Some(accept_loop) => accept_loop.await.map_err(LifecycleError::task_failed)?,
        None => StopReport { graceful: true },
    };

    tracing::info!(gracefully = report.graceful, "server was shut down");

    if let Some(on_shutdown) = on_shutdown {
        on_shutdown().await.map_err(|err| {
            tracing::error!(error = %err, "shutdown hook failed");
            LifecycleError::hook(err)
        })?;
    }

    Ok(report)
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.shared.local_addr)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

async fn serve<S, B>(
    listener: TcpListener,
    service: S,
    mut stop_rx: watch::Receiver<bool>,
    keep_alive_grace_period: Duration,
) -> StopReport
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    tracing::trace!(%remote_addr, "connection accepted");
                    let connection = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service.clone()));
                    let connection = graceful.watch(connection);
                    connections.spawn(async move {
                        if let Err(err) = connection.await {
                            log_connection_error(&err);
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = stop_rx.changed() => break,
        }
    }

    drop(listener);
    tracing::debug!(
        connections = connections.len(),
        "not accepting new connections, waiting for open ones to finish"
    );

    let graceful = tokio::time::timeout(keep_alive_grace_period, graceful.shutdown())
        .await
        .is_ok();
    if graceful {
        tracing::debug!("all connections closed");
    } else {
        tracing::warn!(
            grace_period_ms = keep_alive_grace_period.as_millis() as u64,
            "keep-alive grace period expired, closing remaining connections"
        );
        connections.abort_all();
    }
    while connections.join_next().await.is_some() {}

    StopReport { graceful }
}

fn log_connection_error(err: &hyper::Error) {
    if let Some(io_err) = err.source().and_then(|err| err.downcast_ref::<io::Error>()) {
        match io_err.kind() {
            io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset => {
                tracing::debug!(error = %io_err, "connection closed by client");
            }
            _ => tracing::warn!(error = %io_err, "error while serving connection"),
        }
    } else if err.is_incomplete_message() {
        tracing::debug!(error = %err, "connection closed mid request");
    } else {
        tracing::warn!(error = %err, "failed to serve connection");
    }
}
