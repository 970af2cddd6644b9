//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → handed to HttpServer / UpstreamPool at startup
//! ```
//!
//! The upstream address is fixed for the process lifetime, so there is no
//! reload path.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{ListenerConfig, ObservabilityConfig, PoolConfig, ProxyConfig, UpstreamConfig};
pub use validation::{validate_config, ValidationError};
