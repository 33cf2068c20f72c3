//! Push metrics
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start
//! - Thread-safe but lock-minimal

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of the push facility
///
/// # Thread Safety
///
/// All counters use atomic operations with Relaxed ordering. Publishers on
/// different tasks bump them concurrently without coordination.
#[derive(Debug, Default)]
pub struct PushMetrics {
    /// Fan-outs performed
    publishes: AtomicU64,
    /// Fan-outs that reached no connection
    empty_publishes: AtomicU64,
    /// Per-connection writes initiated
    writes_initiated: AtomicU64,
    /// Writes the transport reported as failed
    delivery_failures: AtomicU64,
    /// Connection registrations under a channel id
    registrations_opened: AtomicU64,
    /// Registrations removed
    registrations_closed: AtomicU64,
    /// Scope expiries handled
    scopes_destroyed: AtomicU64,
}

impl PushMetrics {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Delivery

    /// Record one fan-out that initiated `writes` writes
    pub fn record_publish(&self, writes: u64) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
        self.writes_initiated.fetch_add(writes, Ordering::Relaxed);
        if writes == 0 {
            self.empty_publishes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Registrations

    pub fn record_registration_opened(&self) {
        self.registrations_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration_closed(&self) {
        self.registrations_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scope_destroyed(&self) {
        self.scopes_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            publishes: self.publishes.load(Ordering::Relaxed),
            empty_publishes: self.empty_publishes.load(Ordering::Relaxed),
            writes_initiated: self.writes_initiated.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            registrations_opened: self.registrations_opened.load(Ordering::Relaxed),
            registrations_closed: self.registrations_closed.load(Ordering::Relaxed),
            scopes_destroyed: self.scopes_destroyed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub publishes: u64,
    pub empty_publishes: u64,
    pub writes_initiated: u64,
    pub delivery_failures: u64,
    pub registrations_opened: u64,
    pub registrations_closed: u64,
    pub scopes_destroyed: u64,
}
