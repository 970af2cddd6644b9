//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! http / upstream subsystems produce:
//!     → logging.rs (tracing subscriber, structured events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → optional Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
