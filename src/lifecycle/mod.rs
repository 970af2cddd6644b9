//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → init logging → bind listener → build pool → serve
//!
//! Shutdown:
//!     signals.rs (SIGINT/SIGTERM) → Shutdown::trigger
//!     → axum stops accepting, drains in-flight exchanges
//!     → pool closes idle upstream sockets
//! ```
//!
//! A failed bind is fatal; nothing is served.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
