//! Pass-through forwarding.
//!
//! Drives one [`Exchange`] from pool checkout to the last response byte:
//!
//! ```text
//! checkout ─▶ send head + stream request body ─▶ response head ─▶ relay body
//!    │                  │                              │               │
//!  Dialing      ForwardingRequest/Awaiting     StreamingResponse   Done/Failed
//! ```
//!
//! The request timeout is an inactivity window: every request-body frame
//! restarts it, and the response relay applies the same window between
//! frames. If it expires before the response head, the in-flight future is
//! dropped, which drops the checked-out connection and closes its socket.

use std::io::ErrorKind;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use tokio::sync::oneshot;

use crate::config::UpstreamConfig;
use crate::http::{request, response};
use crate::observability::metrics;
use crate::upstream::exchange::{Event, Exchange, FailureKind, Phase};
use crate::upstream::pool::{PoolError, PooledConnection, UpstreamPool};
use crate::upstream::relay::{Activity, RelayBody, StreamEnd};

/// Upstream identity as seen by error messages and the rewritten `Host`.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub name: String,
    pub port: u16,
    pub authority: String,
}

impl UpstreamTarget {
    pub fn from_config(upstream: &UpstreamConfig) -> Self {
        Self {
            name: upstream.name.clone(),
            port: upstream.port,
            authority: upstream.authority(),
        }
    }
}

/// Forwards pass-through requests to the upstream through the pool.
#[derive(Clone)]
pub struct Forwarder {
    pool: UpstreamPool,
    target: UpstreamTarget,
    request_timeout: Duration,
}

impl Forwarder {
    pub fn new(pool: UpstreamPool, upstream: &UpstreamConfig) -> Self {
        Self {
            pool,
            target: UpstreamTarget::from_config(upstream),
            request_timeout: upstream.request_timeout(),
        }
    }

    /// Forward one request and produce the client response.
    pub async fn forward(&self, request_id: &str, inbound: Request<Body>) -> Response<Body> {
        let mut exchange = Exchange::begin(request_id, inbound.method().clone());
        let activity = Activity::new();

        let outcome = tokio::select! {
            result = self.dispatch(&mut exchange, inbound, &activity) => result,
            _ = activity.idle_for(self.request_timeout) => Err(FailureKind::TimedOut),
        };

        let kind = match outcome {
            Ok((upstream, conn)) => return self.stream_back(exchange, upstream, conn),
            Err(kind) => kind,
        };

        match &kind {
            FailureKind::Unreachable(code) => tracing::error!(
                request_id = %exchange.id(),
                upstream = %self.target.name,
                code = %code,
                "Upstream unreachable"
            ),
            FailureKind::TimedOut => tracing::error!(
                request_id = %exchange.id(),
                upstream = %self.target.name,
                phase = ?exchange.phase(),
                "Upstream request timed out"
            ),
            FailureKind::ClientAborted => tracing::error!(
                request_id = %exchange.id(),
                "Client request error"
            ),
            FailureKind::UpstreamAborted => tracing::error!(
                request_id = %exchange.id(),
                upstream = %self.target.name,
                "Upstream aborted before responding"
            ),
        }
        metrics::record_failure(kind.label());

        match exchange.advance(Event::Fault(kind)) {
            Some(reply) => response::error_reply(&reply, &self.target),
            None => response::client_gone(),
        }
    }

    async fn dispatch(
        &self,
        exchange: &mut Exchange,
        inbound: Request<Body>,
        activity: &Activity,
    ) -> Result<(Response<Incoming>, PooledConnection), FailureKind> {
        let mut conn = self.pool.checkout().await.map_err(|e| {
            tracing::debug!(request_id = %exchange.id(), error = %e, "Checkout failed");
            FailureKind::Unreachable(error_code(&e))
        })?;
        exchange.advance(Event::Connected);
        activity.touch();
        tracing::debug!(request_id = %exchange.id(), connection_id = conn.id(), "Forwarding to upstream");

        let (body_tx, mut body_rx) = oneshot::channel();
        let upload = activity.clone();
        let outbound = request::outbound(inbound, &self.target.authority, move |body| {
            Body::new(
                RelayBody::new(body, move |end| {
                    let _ = body_tx.send(end);
                })
                .with_activity(upload),
            )
        });

        let result = {
            let send = conn.send_request(outbound);
            tokio::pin!(send);
            let mut request_done = false;
            loop {
                tokio::select! {
                    result = &mut send => break result,
                    end = &mut body_rx, if !request_done => {
                        request_done = true;
                        if matches!(end, Ok(StreamEnd::Failed)) {
                            return Err(FailureKind::ClientAborted);
                        }
                        exchange.advance(Event::RequestForwarded);
                    }
                }
            }
        };

        match result {
            Ok(upstream) => {
                exchange.advance(Event::ResponseHead);
                Ok((upstream, conn))
            }
            Err(e) => {
                if matches!(body_rx.try_recv(), Ok(StreamEnd::Failed)) {
                    return Err(FailureKind::ClientAborted);
                }
                tracing::debug!(request_id = %exchange.id(), error = %e, "Upstream exchange failed");
                Err(FailureKind::Unreachable(error_code(&e)))
            }
        }
    }

    fn stream_back(
        &self,
        mut exchange: Exchange,
        upstream: Response<Incoming>,
        conn: PooledConnection,
    ) -> Response<Body> {
        debug_assert_eq!(exchange.phase(), &Phase::StreamingResponse);
        let status = upstream.status();
        tracing::debug!(request_id = %exchange.id(), status = %status, "Streaming upstream response");

        let (parts, incoming) = upstream.into_parts();
        let relay = RelayBody::new(incoming, move |end| {
            let event = match end {
                StreamEnd::Complete => Event::ResponseComplete,
                StreamEnd::Failed => Event::Fault(FailureKind::UpstreamAborted),
                StreamEnd::Abandoned => Event::Fault(FailureKind::ClientAborted),
            };
            exchange.advance(event);
            match exchange.phase() {
                Phase::Done => {
                    conn.release();
                    tracing::debug!(
                        request_id = %exchange.id(),
                        elapsed_ms = exchange.elapsed().as_millis() as u64,
                        "Exchange complete"
                    );
                }
                phase => {
                    tracing::warn!(request_id = %exchange.id(), phase = ?phase, "Response stream ended early");
                    if let Phase::Failed(kind) = phase {
                        metrics::record_failure(kind.label());
                    }
                    drop(conn);
                }
            }
        })
        .with_idle_timeout(self.request_timeout);

        response::mirror(parts, Body::new(relay))
    }
}

/// Map a pool/upstream failure to an errno-style code for the 502 body.
pub fn error_code(err: &PoolError) -> String {
    let code = match err {
        PoolError::Resolve { .. } | PoolError::NoIpv4Address { .. } => "ENOTFOUND",
        PoolError::Connect { source, .. } => io_code(source),
        PoolError::Handshake(e) | PoolError::Upstream(e) => hyper_code(e),
        PoolError::Closed => "ECONNABORTED",
    };
    code.to_string()
}

fn hyper_code(err: &hyper::Error) -> &'static str {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return io_code(io);
        }
        source = cause.source();
    }
    if err.is_timeout() {
        "ETIMEDOUT"
    } else if err.is_incomplete_message() || err.is_closed() || err.is_canceled() {
        "ECONNRESET"
    } else {
        "EPROTO"
    }
}

fn io_code(err: &std::io::Error) -> &'static str {
    match err.kind() {
        ErrorKind::ConnectionRefused => "ECONNREFUSED",
        ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => "ECONNRESET",
        ErrorKind::ConnectionAborted => "ECONNABORTED",
        ErrorKind::TimedOut => "ETIMEDOUT",
        ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        ErrorKind::BrokenPipe => "EPIPE",
        ErrorKind::NotConnected => "ENOTCONN",
        ErrorKind::PermissionDenied => "EACCES",
        _ => "EIO",
    }
}
