//! Observability subsystem
//!
//! - Structured logging through `tracing`
//! - Lock-free push counters
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on delivery
//! 3. No background threads

mod logging;
mod metrics;

pub use logging::init_logging;
pub use metrics::{MetricsSnapshot, PushMetrics};
