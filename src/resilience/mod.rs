//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Sub-request for one part:
//!     → downstream call under the configured timeout
//!     → On transport error or non-2xx: retries.rs (budget left for this part?)
//!     → backoff.rs (jitter + attempt × step) → sleep → call again
//!     → Budget exhausted: failure reply for that part only
//! ```
//!
//! # Design Decisions
//! - Retry budget is per part and independent of the parallelism limit
//! - Sibling parts never wait on one another's retries
//! - Every downstream call has a deadline

pub mod backoff;
pub mod retries;

pub use backoff::calculate_backoff;
pub use retries::RetryPolicy;
