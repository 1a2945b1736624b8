//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher, middleware, server
//!     → logging.rs (tracing subscriber, text or JSON)
//!     → metrics.rs (counters, gauges, histograms → Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Metric calls are no-ops until a recorder is installed
//! - Each batch connection runs inside a span carrying its boundary and request ID

pub mod logging;
pub mod metrics;
