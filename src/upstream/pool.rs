//! Bounded keep-alive connection pool for the single upstream.
//!
//! # Responsibilities
//! - Dial the upstream over IPv4 and run the HTTP/1.1 handshake
//! - Hand out connections, reuse idle ones, retire stale ones
//! - Enforce a hard cap on simultaneously open sockets
//!
//! Every open socket owns one semaphore permit. The permit lives inside the
//! task driving the hyper connection, so it is released exactly when the
//! socket is closed, whether that happens because the upstream hung up, the
//! sweeper retired it, or an exchange discarded it.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::{PoolConfig, UpstreamConfig};
use crate::observability::metrics;

/// Errors raised while obtaining or using a pooled connection.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to resolve upstream host '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("upstream host '{host}' has no IPv4 address")]
    NoIpv4Address { host: String },
    #[error("failed to connect to upstream {address}: {source}")]
    Connect {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP handshake with upstream failed: {0}")]
    Handshake(#[source] hyper::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[source] hyper::Error),
    #[error("connection pool is closed")]
    Closed,
}

/// Pool sizing and timing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub connect_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(pool: &PoolConfig, upstream: &UpstreamConfig) -> Self {
        Self {
            max_connections: pool.max_connections,
            idle_timeout: Duration::from_millis(pool.idle_timeout_ms),
            sweep_interval: Duration::from_millis(pool.sweep_interval_ms),
            connect_timeout: upstream.connect_timeout(),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sockets currently open (idle or checked out).
    pub open: usize,
    /// Sockets parked in the idle list.
    pub idle: usize,
    /// Sockets dialed since startup.
    pub created: u64,
    /// Checkouts served from the idle list.
    pub reused: u64,
    /// Sockets closed by the pool rather than by the upstream.
    pub discarded: u64,
}

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

struct Connection {
    id: u64,
    sender: SendRequest<Body>,
    driver: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolInner {
    host: String,
    port: u16,
    settings: PoolSettings,
    idle: Mutex<VecDeque<IdleConnection>>,
    sockets: Arc<Semaphore>,
    returned: Notify,
    open: Arc<AtomicUsize>,
    closed: AtomicBool,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl PoolInner {
    fn discard(&self, conn: Connection) {
        tracing::debug!(connection_id = conn.id, "Closing upstream connection");
        drop(conn);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn evict_idle(&self) -> usize {
        let idle_timeout = self.settings.idle_timeout;
        let stale: VecDeque<IdleConnection> = {
            let mut idle = self.idle.lock();
            let (keep, stale): (VecDeque<_>, VecDeque<_>) = idle
                .drain(..)
                .partition(|entry| entry.since.elapsed() < idle_timeout && !entry.conn.sender.is_closed());
            *idle = keep;
            stale
        };
        let evicted = stale.len();
        for entry in stale {
            self.discard(entry.conn);
        }
        if evicted > 0 {
            tracing::debug!(evicted, "Retired idle upstream connections");
            self.publish_gauges();
        }
        evicted
    }

    fn publish_gauges(&self) {
        metrics::record_pool(self.open.load(Ordering::SeqCst), self.idle.lock().len());
    }
}

/// Handle to the upstream connection pool. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamPool {
    inner: Arc<PoolInner>,
}

impl UpstreamPool {
    /// Build a pool for `host:port`. No socket is opened until first use.
    pub fn new(host: impl Into<String>, port: u16, settings: PoolSettings) -> Self {
        let max = settings.max_connections.max(1);
        Self {
            inner: Arc::new(PoolInner {
                host: host.into(),
                port,
                sockets: Arc::new(Semaphore::new(max)),
                settings,
                idle: Mutex::new(VecDeque::new()),
                returned: Notify::new(),
                open: Arc::new(AtomicUsize::new(0)),
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(upstream: &UpstreamConfig, pool: &PoolConfig) -> Self {
        Self::new(
            upstream.host.clone(),
            upstream.port,
            PoolSettings::from_config(pool, upstream),
        )
    }

    /// Start the background task that retires idle sockets.
    ///
    /// The task ends on its own once the pool is closed or dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                inner.evict_idle();
            }
        })
    }

    /// Check out a connection ready to carry one request.
    ///
    /// Prefers a live idle socket; otherwise dials a new one if the socket
    /// cap allows, or waits for either an idle socket or a free slot.
    pub async fn checkout(&self) -> Result<PooledConnection, PoolError> {
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(PoolError::Closed);
            }

            let returned = self.inner.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            if let Some(mut conn) = self.take_idle() {
                match conn.sender.ready().await {
                    Ok(()) => {
                        self.inner.reused.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(connection_id = conn.id, "Reusing upstream connection");
                        return Ok(self.wrap(conn));
                    }
                    Err(e) => {
                        tracing::debug!(connection_id = conn.id, error = %e, "Idle connection went stale");
                        self.inner.discard(conn);
                        continue;
                    }
                }
            }

            tokio::select! {
                permit = self.inner.sockets.clone().acquire_owned() => {
                    let permit = permit.map_err(|_| PoolError::Closed)?;
                    let conn = self.dial(permit).await?;
                    return Ok(self.wrap(conn));
                }
                _ = &mut returned => continue,
            }
        }
    }

    fn take_idle(&self) -> Option<Connection> {
        let idle_timeout = self.inner.settings.idle_timeout;
        let mut stale = Vec::new();
        let found = {
            let mut idle = self.inner.idle.lock();
            let mut found = None;
            // Most recently returned first; it is the least likely to have
            // been closed by the upstream.
            while let Some(entry) = idle.pop_back() {
                if entry.since.elapsed() >= idle_timeout || entry.conn.sender.is_closed() {
                    stale.push(entry.conn);
                } else {
                    found = Some(entry.conn);
                    break;
                }
            }
            found
        };
        for conn in stale {
            self.inner.discard(conn);
        }
        found
    }

    fn wrap(&self, conn: Connection) -> PooledConnection {
        self.inner.publish_gauges();
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }

    async fn dial(&self, permit: OwnedSemaphorePermit) -> Result<Connection, PoolError> {
        let address = resolve_ipv4(&self.inner.host, self.inner.port).await?;
        let stream = tokio::time::timeout(self.inner.settings.connect_timeout, connect(address))
            .await
            .map_err(|_| PoolError::Connect {
                address,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })??;

        let (sender, connection) = http1::handshake::<_, Body>(TokioIo::new(stream))
            .await
            .map_err(PoolError::Handshake)?;

        let id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        self.inner.created.fetch_add(1, Ordering::Relaxed);

        let open = OpenSocket {
            open: Arc::clone(&self.inner.open),
            _permit: permit,
        };
        let driver = tokio::spawn(async move {
            let _open = open;
            if let Err(e) = connection.await {
                tracing::debug!(connection_id = id, error = %e, "Upstream connection ended with error");
            }
        });

        tracing::debug!(connection_id = id, address = %address, "Opened upstream connection");
        Ok(Connection { id, sender, driver })
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: self.inner.open.load(Ordering::SeqCst),
            idle: self.inner.idle.lock().len(),
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out connections and close every idle socket.
    ///
    /// Checked-out connections close as their exchanges finish.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<IdleConnection> = self.inner.idle.lock().drain(..).collect();
        for entry in drained {
            self.inner.discard(entry.conn);
        }
        self.inner.sockets.close();
        self.inner.returned.notify_waiters();
        tracing::info!("Upstream connection pool closed");
    }
}

/// Decrements the open-socket count and frees the socket's slot when the
/// connection driver finishes or is aborted.
struct OpenSocket {
    open: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for OpenSocket {
    fn drop(&mut self) {
        let open = self.open.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_open_connections(open);
    }
}

/// A connection checked out of the pool.
///
/// Dropping it closes the socket. Call [`PooledConnection::release`] after a
/// response body has been fully read to return it for reuse.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map_or(0, |c| c.id)
    }

    /// Send one request over this connection.
    pub async fn send_request(&mut self, request: Request<Body>) -> Result<Response<Incoming>, PoolError> {
        let conn = self.conn.as_mut().ok_or(PoolError::Closed)?;
        conn.sender.send_request(request).await.map_err(PoolError::Upstream)
    }

    /// Put the connection back into the idle list.
    pub fn release(mut self) {
        let Some(conn) = self.conn.take() else { return };
        if conn.sender.is_closed() || self.pool.closed.load(Ordering::SeqCst) {
            self.pool.discard(conn);
            return;
        }
        tracing::trace!(connection_id = conn.id, "Returning upstream connection to pool");
        self.pool.idle.lock().push_back(IdleConnection {
            conn,
            since: Instant::now(),
        });
        self.pool.returned.notify_one();
        self.pool.publish_gauges();
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

async fn connect(address: SocketAddr) -> Result<TcpStream, PoolError> {
    let into_err = |source| PoolError::Connect { address, source };
    let socket = TcpSocket::new_v4().map_err(into_err)?;
    socket.set_keepalive(true).map_err(into_err)?;
    let stream = socket.connect(address).await.map_err(into_err)?;
    stream.set_nodelay(true).map_err(into_err)?;
    Ok(stream)
}

/// Resolve `host` to its first IPv4 address. IPv6 results are ignored.
pub async fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr, PoolError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => Ok(SocketAddr::from((v4, port))),
            IpAddr::V6(_) => Err(PoolError::NoIpv4Address { host: host.to_string() }),
        };
    }

    let mut addresses = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| PoolError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addresses
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| PoolError::NoIpv4Address { host: host.to_string() })
}
