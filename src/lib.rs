//! Local forwarding gateway for the Tally accounting engine.
//!
//! Browser and desktop clients cannot call the engine's XML API directly:
//! it sends no CORS headers and listens on loopback IPv4 only. The gateway
//! answers preflights and health probes itself and relays everything else,
//! byte for byte, over a bounded keep-alive connection pool.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use upstream::UpstreamPool;
