//! Response construction.
//!
//! Local answers (health, error replies) are built here; pass-through
//! responses are mirrored from the upstream head untouched.

use axum::body::Body;
use axum::http::{response::Parts, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::upstream::{ErrorReply, UpstreamTarget};

/// Body of `GET /health`. Field order is part of the wire contract.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub proxy: bool,
}

/// Body of 502/504 replies.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
}

pub fn health() -> Response<Body> {
    (
        StatusCode::OK,
        Json(HealthStatus {
            status: "online",
            proxy: true,
        }),
    )
        .into_response()
}

pub fn preflight() -> Response<Body> {
    StatusCode::NO_CONTENT.into_response()
}

/// Render the error reply owed by a failed exchange.
pub fn error_reply(reply: &ErrorReply, target: &UpstreamTarget) -> Response<Body> {
    let (status, message) = match reply {
        ErrorReply::BadGateway { code } => (
            StatusCode::BAD_GATEWAY,
            format!(
                "Proxy is reachable, but {} is NOT responding on port {}. Error: {}",
                target.name, target.port, code
            ),
        ),
        ErrorReply::GatewayTimeout => (
            StatusCode::GATEWAY_TIMEOUT,
            format!("{} Timed Out (Gateway Timeout)", target.name),
        ),
    };
    (status, Json(ErrorBody { error: true, message })).into_response()
}

/// Placeholder for exchanges whose client already failed; nothing reaches
/// the peer, hyper just tears the connection down.
pub fn client_gone() -> Response<Body> {
    StatusCode::BAD_REQUEST.into_response()
}

/// Rebuild the upstream response head around a relayed body.
pub fn mirror(parts: Parts, body: Body) -> Response<Body> {
    Response::from_parts(parts, body)
}
