use super::{hook, os_signals, start, Hook, LifecycleError, Server, Signal, StopReport};
use crate::BoxError;
use futures_util::{Stream, StreamExt};
use http::{Request, Response};
use http_body::Body;
use hyper::body::Incoming;
use std::{
    fmt,
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::time::Instant;
use tower_service::Service;

const DEFAULT_WAIT_FOR_DEREGISTRATION_PERIOD: Duration = Duration::from_millis(3000);

/// Configuration for [`manage_lifecycle`].
pub struct LifecycleConfig {
    keep_alive_grace_period: Duration,
    wait_for_deregistration_period: Duration,
    on_start: Option<Hook>,
    on_shutdown: Option<Hook>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            keep_alive_grace_period: super::DEFAULT_KEEP_ALIVE_GRACE_PERIOD,
            wait_for_deregistration_period: DEFAULT_WAIT_FOR_DEREGISTRATION_PERIOD,
            on_start: None,
            on_shutdown: None,
        }
    }
}

impl LifecycleConfig {
    /// Create a new `LifecycleConfig` with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// How long in-flight connections get to finish once a stop begins.
    ///
    /// Defaults to 3 seconds.
    pub fn keep_alive_grace_period(mut self, period: Duration) -> Self {
        self.keep_alive_grace_period = period;
        self
    }

    /// How long to keep serving after SIGTERM before stopping.
    ///
    /// Defaults to 3 seconds.
    pub fn wait_for_deregistration_period(mut self, period: Duration) -> Self {
        self.wait_for_deregistration_period = period;
        self
    }

    /// Run `f` once the server is listening.
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_start = Some(hook(f));
        self
    }

    /// Run `f` after the server has stopped.
    pub fn on_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_shutdown = Some(hook(f));
        self
    }
}

impl fmt::Debug for LifecycleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleConfig")
            .field("keep_alive_grace_period", &self.keep_alive_grace_period)
            .field(
                "wait_for_deregistration_period",
                &self.wait_for_deregistration_period,
            )
            .field("on_start", &self.on_start.is_some())
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish()
    }
}

/// A server whose shutdown is driven by process signals.
///
/// Created by [`manage_lifecycle`].
#[derive(Clone)]
pub struct Lifecycle {
    server: Server,
    on_shutdown: Arc<Mutex<Option<Hook>>>,
}

impl Lifecycle {
    /// The managed server.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Shut the server down now and run the configured shutdown hook.
    ///
    /// Signals end up here too, so calling this more than once, or racing a
    /// signal, still stops the server only once. Dropping the returned future
    /// does not interrupt a stop it began.
    pub async fn shutdown(&self) -> Result<StopReport, LifecycleError> {
        self.server.begin_stop(|| {
            self.on_shutdown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        });
        self.server.stopped().await
    }

    /// Wait for the server to be shut down, whatever triggered it.
    pub async fn stopped(&self) -> Result<StopReport, LifecycleError> {
        self.server.stopped().await
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("server", &self.server)
            .finish()
    }
}

/// Start `service` on `port` and shut it down on SIGINT or SIGTERM.
///
/// See the [module docs](super) for how each signal is handled.
pub async fn manage_lifecycle<S, B>(
    service: S,
    port: u16,
    config: LifecycleConfig,
) -> Result<Lifecycle, LifecycleError>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let signals = os_signals().map_err(LifecycleError::signal)?;
    manage_lifecycle_with_signals(service, port, config, signals).await
}

/// Like [`manage_lifecycle`] but reacting to `signals` instead of the
/// process's own.
pub async fn manage_lifecycle_with_signals<S, B, Sig>(
    service: S,
    port: u16,
    config: LifecycleConfig,
    signals: Sig,
) -> Result<Lifecycle, LifecycleError>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    Sig: Stream<Item = Signal> + Send + 'static,
{
    let LifecycleConfig {
        keep_alive_grace_period,
        wait_for_deregistration_period,
        on_start,
        on_shutdown,
    } = config;

    let server = start(service, port, keep_alive_grace_period, on_start).await?;
    let lifecycle = Lifecycle {
        server,
        on_shutdown: Arc::new(Mutex::new(on_shutdown)),
    };

    tokio::spawn(watch_signals(
        signals,
        lifecycle.clone(),
        wait_for_deregistration_period,
    ));

    Ok(lifecycle)
}

async fn watch_signals<Sig>(signals: Sig, lifecycle: Lifecycle, deregistration_period: Duration)
where
    Sig: Stream<Item = Signal> + Send + 'static,
{
    let mut signals = std::pin::pin!(signals);
    let mut deadline: Option<Instant> = None;
    let mut signals_ended = false;

    loop {
        tokio::select! {
            signal = signals.next(), if !signals_ended => match signal {
                Some(Signal::Interrupt) => {
                    tracing::info!("SIGINT received, shutting down");
                    break;
                }
                Some(Signal::Terminate) if deadline.is_some() => {
                    tracing::debug!("SIGTERM received again, already waiting for deregistration");
                }
                Some(Signal::Terminate) => {
                    tracing::info!(
                        "SIGTERM received. Waiting for {}ms to allow the load balancer to deregister this instance",
                        deregistration_period.as_millis()
                    );
                    deadline = Some(Instant::now() + deregistration_period);
                }
                None => {
                    if deadline.is_none() {
                        return;
                    }
                    signals_ended = true;
                }
            },
            () = sleep_until(deadline) => break,
            _ = lifecycle.stopped() => return,
        }
    }

    if let Err(err) = lifecycle.shutdown().await {
        tracing::error!(error = %err, "failed to shut down server");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
