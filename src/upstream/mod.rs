//! Upstream subsystem: everything on the egress side of the gateway.
//!
//! # Data Flow
//! ```text
//! pass-through request
//!     → forward.rs (drive the exchange, apply the request timeout)
//!     → pool.rs (check out a keep-alive connection, dial over IPv4 if needed)
//!     → relay.rs (stream request body up, response body down)
//!     → exchange.rs (phase tracking; decides whether an error reply is owed)
//! ```

pub mod exchange;
pub mod forward;
pub mod pool;
pub mod relay;

pub use exchange::{ErrorReply, Event, Exchange, FailureKind, Phase};
pub use forward::{Forwarder, UpstreamTarget};
pub use pool::{PoolError, PoolSettings, PoolStats, PooledConnection, UpstreamPool};
pub use relay::{RelayBody, StreamEnd};
