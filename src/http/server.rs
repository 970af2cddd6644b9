//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the single gateway handler
//! - Wire up middleware (CORS headers, request ID, tracing)
//! - Classify requests: preflight, health probe, pass-through
//! - Hand pass-through requests to the upstream forwarder
//! - Own the connection pool lifecycle (sweeper on start, close on stop)

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    Router,
};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::cors;
use crate::http::request::{self, RequestClass};
use crate::http::response;
use crate::lifecycle::shutdown;
use crate::observability::metrics;
use crate::upstream::{Forwarder, UpstreamPool};

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Forwarder,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    pool: UpstreamPool,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// The pool is created here but opens no socket until the first
    /// pass-through request.
    pub fn new(config: ProxyConfig) -> Self {
        let pool = UpstreamPool::from_config(&config.upstream, &config.pool);
        let state = AppState {
            forwarder: Forwarder::new(pool.clone(), &config.upstream),
        };

        let router = Self::build_router(state);
        Self { router, pool }
    }

    fn build_router(state: AppState) -> Router {
        let router = Router::new().fallback(gateway_handler).with_state(state);
        cors::apply(router)
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` fires, then close the pool.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = self.pool.spawn_sweeper();

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        self.pool.close();
        sweeper.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Handle to the upstream pool, for inspection.
    pub fn pool(&self) -> UpstreamPool {
        self.pool.clone()
    }
}

/// The single gateway handler.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_id = request::request_id(&request);
    let method = request.method().to_string();
    let class = request::classify(request.method(), request.uri());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        uri = %request.uri(),
        class = ?class,
        "Inbound request"
    );

    let (response, label) = match class {
        RequestClass::Preflight => (response::preflight(), "preflight"),
        RequestClass::Health => (response::health(), "health"),
        RequestClass::PassThrough => (
            state.forwarder.forward(&request_id, request).await,
            "pass_through",
        ),
    };

    metrics::record_request(&method, response.status().as_u16(), label, start);
    response
}
