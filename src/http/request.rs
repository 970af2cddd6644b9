//! Request classification and outbound request construction.
//!
//! # Design Decisions
//! - Only `content-type` and `content-length` survive the hop; every other
//!   inbound header is dropped
//! - The outbound target is always `/`; the upstream exposes a single endpoint
//! - `Host` is rewritten to the upstream authority and `Connection` is forced
//!   to `keep-alive`

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Uri};

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Inbound headers copied onto the outbound request.
pub const FORWARDED_HEADERS: [header::HeaderName; 2] = [header::CONTENT_TYPE, header::CONTENT_LENGTH];

/// The exact request target answered locally as a health probe.
pub const HEALTH_PATH: &str = "/health";

/// How the gateway handles an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// CORS preflight, answered with 204.
    Preflight,
    /// Liveness probe, answered locally.
    Health,
    /// Forwarded to the upstream.
    PassThrough,
}

/// Classify by method first, then by exact request target.
pub fn classify(method: &Method, uri: &Uri) -> RequestClass {
    if method == Method::OPTIONS {
        RequestClass::Preflight
    } else if uri.path_and_query().map(|pq| pq.as_str()) == Some(HEALTH_PATH) {
        RequestClass::Health
    } else {
        RequestClass::PassThrough
    }
}

/// Request id assigned by the request-id layer, or "unknown".
pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Build the request sent upstream.
///
/// `wrap_body` receives the inbound body and returns the body to stream
/// upstream, so callers can observe how the upload ends.
pub fn outbound(
    inbound: Request<Body>,
    authority: &str,
    wrap_body: impl FnOnce(Body) -> Body,
) -> Request<Body> {
    let (parts, body) = inbound.into_parts();

    let mut request = Request::new(wrap_body(body));
    *request.method_mut() = parts.method;
    *request.uri_mut() = Uri::from_static("/");

    let headers = request.headers_mut();
    for name in FORWARDED_HEADERS {
        if let Some(value) = parts.headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    match HeaderValue::from_str(authority) {
        Ok(host) => {
            headers.insert(header::HOST, host);
        }
        Err(e) => tracing::warn!(authority = %authority, error = %e, "Upstream authority is not a valid Host header"),
    }
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    request
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/tally/some/path?x=1")
            .header(header::HOST, "localhost:3001")
            .header(header::CONTENT_TYPE, "text/xml")
            .header(header::CONTENT_LENGTH, "11")
            .header(header::COOKIE, "session=secret")
            .header(header::ORIGIN, "http://localhost:5173")
            .header("ngrok-skip-browser-warning", "true")
            .body(Body::from("<ENVELOPE/>"))
            .unwrap()
    }

    #[test]
    fn classification_order() {
        assert_eq!(classify(&Method::OPTIONS, &Uri::from_static("/health")), RequestClass::Preflight);
        assert_eq!(classify(&Method::POST, &Uri::from_static("/health")), RequestClass::Health);
        assert_eq!(classify(&Method::GET, &Uri::from_static("/health")), RequestClass::Health);
        assert_eq!(classify(&Method::GET, &Uri::from_static("/health?x=1")), RequestClass::PassThrough);
        assert_eq!(classify(&Method::GET, &Uri::from_static("/healthz")), RequestClass::PassThrough);
        assert_eq!(classify(&Method::POST, &Uri::from_static("/")), RequestClass::PassThrough);
    }

    #[test]
    fn only_allowlisted_headers_survive() {
        let request = outbound(inbound(), "127.0.0.1:9000", |b| b);
        let headers = request.headers();

        assert_eq!(headers.len(), 4);
        assert_eq!(headers[header::CONTENT_TYPE], "text/xml");
        assert_eq!(headers[header::CONTENT_LENGTH], "11");
        assert_eq!(headers[header::HOST], "127.0.0.1:9000");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert!(headers.get(header::COOKIE).is_none());
        assert!(headers.get("ngrok-skip-browser-warning").is_none());
    }

    #[test]
    fn path_is_always_root_and_method_kept() {
        let request = outbound(inbound(), "127.0.0.1:9000", |b| b);
        assert_eq!(request.uri(), "/");
        assert_eq!(request.method(), Method::POST);
    }

    #[test]
    fn missing_request_id_is_unknown() {
        assert_eq!(request_id(&inbound()), "unknown");
    }
}
