//! Permissive CORS headers stamped on every response.
//!
//! Applied as a response layer so preflights, health probes, error replies
//! and mirrored upstream responses all carry them. An upstream response that
//! already sets one of these headers keeps its own value.

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "POST, GET, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, ngrok-skip-browser-warning";
pub const ALLOW_CREDENTIALS: &str = "true";

/// The four CORS headers, in the order they are applied.
pub fn cors_headers() -> [(HeaderName, HeaderValue); 4] {
    use axum::http::header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
        ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    };
    [
        (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(ALLOW_ORIGIN)),
        (ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS)),
        (ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS)),
        (ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static(ALLOW_CREDENTIALS)),
    ]
}

/// Wrap `router` with one `if_not_present` header layer per CORS header.
pub fn apply<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    cors_headers()
        .into_iter()
        .fold(router, |router, (name, value)| {
            router.layer(SetResponseHeaderLayer::if_not_present(name, value))
        })
}
