//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! listener.rs (bind, classify bind failures)
//!     → tokio TcpListener
//!     → axum::serve (one task per inbound connection)
//! ```

pub mod listener;

pub use listener::{bind, ListenerError};
