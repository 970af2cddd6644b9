//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing span)
//!     → request.rs (classify: preflight / health / pass-through)
//!     → local answer (response.rs) or upstream::Forwarder
//!     → cors.rs (CORS headers on the way out)
//!     → Send to client
//! ```

pub mod cors;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestClass, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
