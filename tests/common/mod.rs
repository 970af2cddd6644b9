//! Shared utilities for the gateway integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tally_proxy::config::ProxyConfig;
use tally_proxy::lifecycle::Shutdown;
use tally_proxy::{net, HttpServer, UpstreamPool};

/// Socket accounting on the upstream side.
#[derive(Default)]
pub struct SocketStats {
    accepted: AtomicUsize,
    open: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicUsize,
}

impl SocketStats {
    fn opened(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A request as the upstream received it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// In-process stand-in for the accounting engine.
pub struct StubUpstream {
    pub addr: SocketAddr,
    pub stats: Arc<SocketStats>,
    pub seen: Arc<Mutex<Vec<SeenRequest>>>,
    task: JoinHandle<()>,
}

impl Drop for StubUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a keep-alive HTTP/1.1 upstream whose replies come from `handler`.
pub async fn start_upstream<F, Fut>(handler: F) -> StubUpstream
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(SocketStats::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let task = {
        let stats = stats.clone();
        let seen = seen.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                stats.opened();
                let stats = stats.clone();
                let seen = seen.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let seen = seen.clone();
                        let handler = handler.clone();
                        async move {
                            let (parts, body) = request.into_parts();
                            let body = axum::body::to_bytes(Body::new(body), usize::MAX)
                                .await
                                .unwrap_or_default();
                            let request = SeenRequest {
                                method: parts.method,
                                uri: parts.uri,
                                headers: parts.headers,
                                body,
                            };
                            seen.lock().push(request.clone());
                            Ok::<_, Infallible>(handler(request).await)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                    stats.closed();
                });
            }
        })
    };

    StubUpstream {
        addr,
        stats,
        seen,
        task,
    }
}

/// Upstream that echoes the request body and content type with a 200.
pub async fn echo_upstream() -> StubUpstream {
    start_upstream(|request| async move { echo(&request) }).await
}

pub fn echo(request: &SeenRequest) -> Response<Body> {
    let mut response = Response::new(Body::from(request.body.clone()));
    if let Some(content_type) = request.headers.get("content-type") {
        response
            .headers_mut()
            .insert("content-type", content_type.clone());
    }
    response
}

/// Upstream that echoes after `delay`.
pub async fn slow_upstream(delay: Duration) -> StubUpstream {
    start_upstream(move |request| async move {
        tokio::time::sleep(delay).await;
        echo(&request)
    })
    .await
}

pub fn fixed(status: StatusCode, headers: &[(&'static str, &'static str)], body: &'static str) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Raw TCP upstream with socket accounting.
///
/// A socket counts as closed once the peer hangs up.
pub struct RawUpstream {
    pub addr: SocketAddr,
    pub stats: Arc<SocketStats>,
    task: JoinHandle<()>,
}

impl Drop for RawUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Upstream that accepts and reads but never answers.
pub async fn black_hole() -> RawUpstream {
    raw_upstream(None).await
}

/// Upstream that writes `reply` after the first bytes of a request, then
/// goes silent without closing.
pub async fn stalling_upstream(reply: &'static [u8]) -> RawUpstream {
    raw_upstream(Some(reply)).await
}

async fn raw_upstream(reply: Option<&'static [u8]>) -> RawUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(SocketStats::default());

    let task = {
        let stats = stats.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                stats.opened();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let mut reply = reply;
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {
                                if let Some(bytes) = reply.take() {
                                    if stream.write_all(bytes).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    stats.closed();
                });
            }
        })
    };

    RawUpstream { addr, stats, task }
}

/// A port with nothing listening on it.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Gateway config pointed at `upstream`, listening on an ephemeral port.
pub fn gateway_config(upstream: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.host = upstream.ip().to_string();
    config.upstream.port = upstream.port();
    config
}

/// A running gateway.
pub struct Gateway {
    pub addr: SocketAddr,
    pub pool: UpstreamPool,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), std::io::Error>>,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to stop.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("gateway should stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn start_gateway(config: ProxyConfig) -> Gateway {
    let listener = net::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config);
    let pool = server.pool();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    Gateway {
        addr,
        pool,
        shutdown,
        task,
    }
}

/// Client that talks to the gateway directly, ignoring proxy env vars.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
