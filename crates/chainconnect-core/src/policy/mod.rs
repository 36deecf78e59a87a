//! Endpoint reliability policies.
//!
//! ```text
//! request → [EndpointHealth: skip cooling endpoints] → endpoint
//!                 ↑ record success / failure
//! handle  → [FailureWindow: evict when failure rate too high]
//! stream  → [Backoff: delay between resubscribe attempts]
//! ```

pub mod backoff;
pub mod endpoint_health;
pub mod failure_window;

pub use backoff::{Backoff, BackoffConfig};
pub use endpoint_health::{EndpointHealth, EndpointHealthConfig, EndpointStatus};
pub use failure_window::FailureWindow;
