use bytes::Bytes;
use futures_util::FutureExt;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tower::ServiceBuilder;
use tower_http_lifecycle::{
    abort::is_aborted_by_client,
    scope::{Outcome, RequestScope},
    server::{
        hook, manage_lifecycle_with_signals, start, LifecycleConfig, LifecycleError, Server,
        Signal,
    },
    ServiceBuilderExt,
};

const BODY: &[u8] = br#"{"success":true}"#;

macro_rules! empty_service {
    () => {
        tower::service_fn(|_req: Request<Incoming>| async {
            Ok::<_, Infallible>(Response::new(Empty::<Bytes>::new()))
        })
    };
}

/// Serve a handler that reports its scope, sleeps for `delay` and then answers `BODY`.
async fn serve_app(
    delay: Duration,
    grace: Duration,
) -> (Server, mpsc::UnboundedReceiver<RequestScope>) {
    let (scopes_tx, scopes_rx) = mpsc::unbounded_channel();
    let service = ServiceBuilder::new()
        .set_x_request_id()
        .detect_aborts()
        .service_fn(move |req: Request<Incoming>| {
            let scopes_tx = scopes_tx.clone();
            async move {
                assert!(!is_aborted_by_client(&req));
                if let Some(scope) = RequestScope::from_request(&req) {
                    let _ = scopes_tx.send(scope);
                }
                tokio::time::sleep(delay).await;
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(BODY))))
            }
        });

    let server = start(service, 0, grace, None).await.unwrap();
    (server, scopes_rx)
}

fn url(server: &Server) -> http::Uri {
    format!("http://127.0.0.1:{}/", server.local_addr().port())
        .parse()
        .unwrap()
}

fn client() -> Client<hyper_util::client::legacy::connect::HttpConnector, Empty<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

async fn wait_until_aborted(scope: &RequestScope) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !scope.is_aborted() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("request was never marked aborted");
}

#[tokio::test]
async fn completed_request_is_not_aborted() {
    let (server, mut scopes) = serve_app(Duration::from_millis(100), Duration::from_secs(3)).await;

    let res = client().get(url(&server)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], BODY);

    let scope = scopes.recv().await.unwrap();
    let id = scope.request_id().unwrap().to_str().unwrap().to_owned();
    assert!(id.ends_with("-1"), "unexpected id {id}");
    assert!(!scope.is_aborted());
    assert_eq!(scope.status(), Some(StatusCode::OK));

    let report = server.stop(None).await.unwrap();
    assert!(report.graceful);
}

#[tokio::test]
async fn client_disconnect_marks_request_aborted() {
    let (server, mut scopes) = serve_app(Duration::from_millis(500), Duration::from_secs(3)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", server.local_addr().port()))
        .await
        .unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();

    let scope = scopes.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(stream);

    wait_until_aborted(&scope).await;
    assert_eq!(scope.status(), Some(StatusCode::BAD_REQUEST));

    server.stop(None).await.unwrap();
}

#[tokio::test]
async fn head_request_completes_without_an_abort() {
    let (server, mut scopes) = serve_app(Duration::ZERO, Duration::from_secs(3)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", server.local_addr().port()))
        .await
        .unwrap();
    stream
        .write_all(b"HEAD / HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut buf = [0; 1024];
    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await.unwrap();
        assert_ne!(n, 0, "connection closed before the response head");
        head.extend_from_slice(&buf[..n]);
    }
    assert!(head.starts_with(b"HTTP/1.1 200 OK"));

    let scope = scopes.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(stream);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(scope.outcome(), Some(Outcome::Completed));
    assert_eq!(scope.status(), Some(StatusCode::OK));

    server.stop(None).await.unwrap();
}

#[tokio::test]
async fn stop_lets_in_flight_requests_finish() {
    let (server, mut scopes) = serve_app(Duration::from_millis(100), Duration::from_secs(3)).await;

    let request = tokio::spawn(client().get(url(&server)));
    let scope = scopes.recv().await.unwrap();

    let report = server.stop(None).await.unwrap();
    assert!(report.graceful);
    assert!(server.is_stopping());

    let res = request.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], BODY);
    assert!(!scope.is_aborted());

    assert!(TcpStream::connect(("127.0.0.1", server.local_addr().port()))
        .await
        .is_err());
}

#[tokio::test]
async fn connections_outliving_the_grace_period_are_closed() {
    let (server, mut scopes) = serve_app(Duration::from_secs(1), Duration::from_millis(50)).await;

    let request = tokio::spawn(client().get(url(&server)));
    let scope = scopes.recv().await.unwrap();

    let report = server.stop(None).await.unwrap();
    assert!(!report.graceful);

    assert!(request.await.unwrap().is_err());
    wait_until_aborted(&scope).await;
}

#[tokio::test]
async fn stopping_twice_runs_the_hook_once() {
    let (server, _scopes) = serve_app(Duration::ZERO, Duration::from_secs(3)).await;
    let runs = Arc::new(AtomicUsize::new(0));
    let counting_hook = || {
        let runs = runs.clone();
        hook(move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    let (first, second) = tokio::join!(
        server.stop(Some(counting_hook())),
        server.stop(Some(counting_hook()))
    );
    assert_eq!(first.unwrap(), second.unwrap());

    server.stop(Some(counting_hook())).await.unwrap();
    assert!(server.stopped().await.unwrap().graceful);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropped_stop_still_drains_and_runs_its_hook() {
    let (server, mut scopes) = serve_app(Duration::from_millis(300), Duration::from_secs(3)).await;
    let runs = Arc::new(AtomicUsize::new(0));

    let request = tokio::spawn(client().get(url(&server)));
    let scope = scopes.recv().await.unwrap();

    let stop = server.stop(Some(hook({
        let runs = runs.clone();
        move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })));
    assert!(stop.now_or_never().is_none());
    assert!(server.is_stopping());

    let report = server.stop(None).await.unwrap();
    assert!(report.graceful);
    assert_eq!(scope.outcome(), Some(Outcome::Completed));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let res = request.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn shutdown_hook_errors_are_returned_to_every_caller() {
    let (server, _scopes) = serve_app(Duration::ZERO, Duration::from_secs(3)).await;

    let err = server
        .stop(Some(hook(|| async { Err("pool refused to close".into()) })))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Hook(_)));

    let again = server.stopped().await.unwrap_err();
    assert!(matches!(again, LifecycleError::Hook(_)));
}

#[tokio::test]
async fn failing_start_hook_rejects_start() {
    let err = start(
        empty_service!(),
        0,
        Duration::from_secs(3),
        Some(hook(|| async { Err("no database".into()) })),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, LifecycleError::Hook(_)));
    assert_eq!(err.to_string(), "lifecycle hook failed");
}

#[tokio::test]
async fn binding_a_taken_port_fails() {
    let taken = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
    let port = taken.local_addr().unwrap().port();
    let err = start(empty_service!(), port, Duration::from_secs(3), None)
        .await
        .unwrap_err();

    match err {
        LifecycleError::Bind { port: failed, .. } => assert_eq!(failed, port),
        other => panic!("unexpected error: {other}"),
    }
}

fn signal_channel() -> (
    mpsc::UnboundedSender<Signal>,
    impl futures_util::Stream<Item = Signal> + Send + 'static,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let signals = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|signal| (signal, rx))
    });
    (tx, signals)
}

#[tokio::test(start_paused = true)]
async fn terminate_waits_for_deregistration_once() {
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let config = LifecycleConfig::new()
        .wait_for_deregistration_period(Duration::from_secs(3))
        .on_shutdown({
            let shutdowns = shutdowns.clone();
            move || async move {
                shutdowns.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    let (signals_tx, signals) = signal_channel();
    let lifecycle = manage_lifecycle_with_signals(empty_service!(), 0, config, signals)
        .await
        .unwrap();

    signals_tx.send(Signal::Terminate).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!lifecycle.server().is_stopping());

    // a second SIGTERM must not push the deadline out
    signals_tx.send(Signal::Terminate).unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let report = tokio::time::timeout(Duration::from_millis(500), lifecycle.stopped())
        .await
        .expect("server did not stop when the deregistration period ended")
        .unwrap();
    assert!(report.graceful);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

    lifecycle.shutdown().await.unwrap();
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn interrupt_cuts_the_deregistration_window_short() {
    let config = LifecycleConfig::new().wait_for_deregistration_period(Duration::from_secs(30));
    let (signals_tx, signals) = signal_channel();
    let lifecycle = manage_lifecycle_with_signals(empty_service!(), 0, config, signals)
        .await
        .unwrap();

    signals_tx.send(Signal::Terminate).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!lifecycle.server().is_stopping());

    signals_tx.send(Signal::Interrupt).unwrap();
    tokio::time::timeout(Duration::from_millis(100), lifecycle.stopped())
        .await
        .expect("interrupt did not stop the server")
        .unwrap();
}

#[tokio::test]
async fn programmatic_shutdown_without_signals() {
    let (_signals_tx, signals) = signal_channel();
    let lifecycle =
        manage_lifecycle_with_signals(empty_service!(), 0, LifecycleConfig::default(), signals)
            .await
            .unwrap();

    let waiter = tokio::spawn({
        let lifecycle = lifecycle.clone();
        async move { lifecycle.stopped().await }
    });

    let report = lifecycle.shutdown().await.unwrap();
    assert!(report.graceful);
    assert_eq!(waiter.await.unwrap().unwrap(), report);
}

#[tokio::test]
async fn dropped_shutdown_keeps_its_hook() {
    let runs = Arc::new(AtomicUsize::new(0));
    let config = LifecycleConfig::new().on_shutdown({
        let runs = runs.clone();
        move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let (_signals_tx, signals) = signal_channel();
    let lifecycle = manage_lifecycle_with_signals(empty_service!(), 0, config, signals)
        .await
        .unwrap();

    assert!(lifecycle.shutdown().now_or_never().is_none());

    let report = lifecycle.stopped().await.unwrap();
    assert!(report.graceful);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    lifecycle.shutdown().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
