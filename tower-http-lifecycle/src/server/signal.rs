use futures_util::Stream;
use std::{
    io,
    task::{Context, Poll},
};

/// A process signal relevant to the server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, or Ctrl-C.
    Interrupt,
    /// SIGTERM, sent by orchestrators before they stop a process.
    Terminate,
}

/// Stream of the signals this process receives.
///
/// Must be called inside a tokio runtime. Outside of unix only [`Signal::Interrupt`]
/// is ever produced.
#[cfg(unix)]
pub fn os_signals() -> io::Result<impl Stream<Item = Signal> + Send + Unpin + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(futures_util::stream::poll_fn(move |cx: &mut Context<'_>| {
        if let Poll::Ready(Some(())) = interrupt.poll_recv(cx) {
            return Poll::Ready(Some(Signal::Interrupt));
        }
        if let Poll::Ready(Some(())) = terminate.poll_recv(cx) {
            return Poll::Ready(Some(Signal::Terminate));
        }
        Poll::Pending
    }))
}

/// Stream of the signals this process receives.
///
/// Must be called inside a tokio runtime. Outside of unix only [`Signal::Interrupt`]
/// is ever produced.
#[cfg(windows)]
pub fn os_signals() -> io::Result<impl Stream<Item = Signal> + Send + Unpin + 'static> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;

    Ok(futures_util::stream::poll_fn(move |cx: &mut Context<'_>| {
        match ctrl_c.poll_recv(cx) {
            Poll::Ready(Some(())) => Poll::Ready(Some(Signal::Interrupt)),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }))
}
